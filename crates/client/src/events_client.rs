//! Unix-socket client for the master's `events.sock` egress (§4.9): dial
//! in, write the subscription tag-prefix line, then read a
//! newline-delimited JSON [`EventMessage`] stream, mirroring the protocol
//! served by the master's `events_egress` module.

use std::path::Path;

use saltcore_wire::EventMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::error::ClientError;

/// Connect to `socket_path` and subscribe to `tag_prefix`, spawning a
/// background task that forwards decoded events onto the returned channel
/// until the connection closes or the receiver is dropped.
///
/// Subscribing happens before the caller sends its `submit_request`
/// (§4.9's subscribe-before-submit ordering) so a fast-returning minion's
/// reply is never missed while the client is still waiting on the
/// `submit_response` round-trip.
pub async fn subscribe(
    socket_path: &Path,
    tag_prefix: impl Into<String>,
) -> Result<mpsc::Receiver<EventMessage>, ClientError> {
    let mut stream = UnixStream::connect(socket_path).await?;
    let mut line = tag_prefix.into();
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;

    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = buf.trim_end_matches(['\n', '\r']);
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventMessage>(trimmed) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping malformed event line");
                        }
                    }
                }
                Err(_) => break,
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn writes_subscription_line_then_yields_decoded_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = tokio::spawn(async move {
            let (mut stream, _addr) = listener.accept().await.expect("accept");
            let mut prefix_buf = [0u8; 64];
            let mut read_half = &mut stream;
            let mut total = Vec::new();
            loop {
                let mut chunk = [0u8; 1];
                read_half.read_exact(&mut chunk).await.expect("read byte");
                if chunk[0] == b'\n' {
                    break;
                }
                total.push(chunk[0]);
            }
            let _ = &prefix_buf;
            assert_eq!(String::from_utf8(total).expect("utf8"), "jid-1/ret/");

            let event = EventMessage { tag: "jid-1/ret/web-01".to_string(), data: serde_json::json!({"ok": true}), ts: 1 };
            let mut line = serde_json::to_vec(&event).expect("encode");
            line.push(b'\n');
            use tokio::io::AsyncWriteExt;
            stream.write_all(&line).await.expect("write");
        });

        let mut rx = subscribe(&path, "jid-1/ret/").await.expect("subscribe");
        let event = rx.recv().await.expect("event");
        assert_eq!(event.tag, "jid-1/ret/web-01");
        assert_eq!(event.data, serde_json::json!({"ok": true}));

        server.await.expect("server task");
    }
}
