//! Client configuration. The top-level `saltcore` binary is two peers of
//! the master, not one binary: `run` is a network client of the request
//! server (§4.9); `keys` is a filesystem peer of the key store, exactly
//! like `salt-key` operates on the same directories the master reads
//! (§6 Admin surface), with no round-trip to the master at all.

use std::path::PathBuf;

use saltcore_wire::{GatherMode, TargetKind};

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "saltcore", version, about = "Submit jobs to and inspect keys of a saltcore master.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Submit a job and collect minion returns.
    Run(RunArgs),
    /// Inspect and transition the on-disk minion key store.
    Keys(KeysArgs),
}

#[derive(Debug, Clone, clap::Parser)]
pub struct RunArgs {
    /// Host the master's request server is bound on.
    #[arg(long, default_value = "127.0.0.1", env = "SALTCORE_MASTER_HOST")]
    pub master_host: String,

    #[arg(long, default_value_t = 4506, env = "SALTCORE_MASTER_REQUEST_PORT")]
    pub request_port: u16,

    /// Directory holding the master's `events.sock` egress socket. The
    /// client must run on the same host as the master (§4.9: "local
    /// client").
    #[arg(long, default_value = "./saltcore-run/run", env = "SALTCORE_MASTER_RUNTIME_DIR")]
    pub runtime_dir: PathBuf,

    /// Target expression, evaluated by each minion against its own
    /// identity facts.
    #[arg(long)]
    pub target: String,

    /// How `--target` is interpreted.
    #[arg(long, value_enum, default_value = "glob")]
    pub target_kind: TargetKindArg,

    /// Function name the minion's runner is asked to invoke.
    #[arg(long = "fn")]
    pub func: String,

    /// Positional arguments, each parsed as JSON (a bare word becomes a
    /// JSON string if it fails to parse as JSON).
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// `key=value` keyword arguments; `value` is parsed the same way as
    /// `--arg`.
    #[arg(long = "kwarg")]
    pub kwargs: Vec<String>,

    /// User name attributed to this job.
    #[arg(long, default_value = "root", env = "SALTCORE_CLIENT_USER")]
    pub user: String,

    /// Credential presented to the master's `submit_request` authorization
    /// check, if the master requires one.
    #[arg(long, env = "SALTCORE_CLIENT_CREDENTIAL")]
    pub credential: Option<String>,

    /// Seconds to wait for returns before applying `--gather-mode`.
    #[arg(long, default_value_t = 5, env = "SALTCORE_CLIENT_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Behavior when the deadline arrives before every targeted minion has
    /// replied.
    #[arg(long, value_enum, default_value = "list")]
    pub gather_mode: GatherModeArg,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum TargetKindArg {
    Glob,
    List,
    Grain,
    Compound,
}

impl From<TargetKindArg> for TargetKind {
    fn from(value: TargetKindArg) -> Self {
        match value {
            TargetKindArg::Glob => TargetKind::Glob,
            TargetKindArg::List => TargetKind::List,
            TargetKindArg::Grain => TargetKind::Grain,
            TargetKindArg::Compound => TargetKind::Compound,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum GatherModeArg {
    List,
    Batch,
    FailOnAnyMissing,
}

impl From<GatherModeArg> for GatherMode {
    fn from(value: GatherModeArg) -> Self {
        match value {
            GatherModeArg::List => GatherMode::List,
            GatherModeArg::Batch => GatherMode::Batch,
            GatherModeArg::FailOnAnyMissing => GatherMode::FailOnAnyMissing,
        }
    }
}

impl RunArgs {
    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.master_host, self.request_port)
    }

    pub fn events_socket_path(&self) -> PathBuf {
        self.runtime_dir.join("events.sock")
    }
}

#[derive(Debug, Clone, clap::Parser)]
pub struct KeysArgs {
    /// Root directory of the on-disk minion key store (the master's
    /// `<keys_dir>/minions`).
    #[arg(long, default_value = "./saltcore-run/keys/minions", env = "SALTCORE_MASTER_KEYS_DIR")]
    pub keys_dir: PathBuf,

    #[command(subcommand)]
    pub action: KeysAction,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum KeysAction {
    /// List every minion_id in each state.
    List,
    /// Accept a pending minion_id.
    Accept { minion_id: String },
    /// Reject a pending minion_id.
    Reject { minion_id: String },
    /// Delete a minion_id's key record entirely.
    Delete { minion_id: String },
}
