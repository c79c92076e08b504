use clap::Parser;
use tracing::error;

use saltcore_client::config::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let result = match &cli.command {
        Command::Run(args) => run_and_print(args).await,
        Command::Keys(args) => saltcore_client::keys::run(args).await,
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run_and_print(args: &saltcore_client::config::RunArgs) -> Result<(), saltcore_client::ClientError> {
    let outcome = saltcore_client::job::run(args).await?;
    let rendered = serde_json::json!({
        "jid": outcome.jid,
        "returns": outcome.returns,
        "missing": outcome.missing,
    });
    println!("{}", serde_json::to_string_pretty(&rendered).unwrap_or_default());
    Ok(())
}
