//! Event-bus egress (§6 `event_pub`): a Unix-domain socket a separate OS
//! process (the local client) connects to in order to observe bus events
//! without being a worker. Protocol: the client writes one line naming its
//! tag-prefix subscription, then reads a newline-delimited JSON
//! `EventMessage` stream until it disconnects.

use std::sync::Arc;

use saltcore_wire::EventMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, warn};

pub async fn serve(listener: UnixListener, events: Arc<saltcore_eventbus::EventBus>) {
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "events egress accept failed");
                continue;
            }
        };
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, events).await {
                debug!(%err, "events egress connection ended");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::UnixStream, events: Arc<saltcore_eventbus::EventBus>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut prefix_line = String::new();
    reader.read_line(&mut prefix_line).await?;
    let prefix = prefix_line.trim_end_matches(['\n', '\r']).to_string();

    let mut subscription = events.subscribe(prefix);
    while let Some(event) = subscription.recv().await {
        let mut line = serde_json::to_vec(&event as &EventMessage).unwrap_or_default();
        line.push(b'\n');
        if write_half.write_all(&line).await.is_err() {
            break;
        }
    }
    Ok(())
}
