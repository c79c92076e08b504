//! Publisher (§4.4): a TCP listener minions subscribe to, fed by a single
//! `broadcast` channel that every worker's sealed publish envelope is
//! pushed onto.
//!
//! The publisher is stateless with respect to targeting — it signs nothing
//! itself (the envelope arrives already sealed and, where applicable,
//! signed by the worker that produced it) and writes the same frame to
//! every connected minion. Per-connection back-pressure is realized as the
//! `broadcast` channel's own lagging-receiver behavior: a connection whose
//! reader falls more than `pub_max_queue` frames behind gets
//! `RecvError::Lagged` instead of silently catching up, and this
//! implementation treats that exactly as the spec's "close the connection,
//! the minion will reconnect."

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use saltcore_wire::{Announce, Frame, FrameTransport, Payload};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::registry::ConnectedRegistry;

/// Shared handle workers push sealed publish envelopes through.
#[derive(Clone)]
pub struct PublishBus {
    tx: broadcast::Sender<Frame>,
}

impl PublishBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Broadcast a sealed publish (or session-rotate) envelope to every
    /// currently subscribed minion connection.
    pub fn broadcast(&self, frame: Frame) {
        let _ = self.tx.send(frame);
    }

    fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }
}

/// Run the publisher's accept loop until the listener is closed or the
/// process is asked to shut down via `shutdown`.
pub async fn serve(
    listener: TcpListener,
    bus: PublishBus,
    connected: Arc<ConnectedRegistry>,
    key_store: Arc<saltcore_crypto::KeyStore>,
    sessions: Arc<crate::registry::SessionRegistry>,
    max_connections: usize,
) -> std::io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    loop {
        let (stream, peer) = listener.accept().await?;
        if active.load(Ordering::SeqCst) >= max_connections {
            warn!(%peer, "publisher connection refused: pub_max_connections reached");
            drop(stream);
            continue;
        }
        active.fetch_add(1, Ordering::SeqCst);
        let bus = bus.clone();
        let connected = connected.clone();
        let key_store = key_store.clone();
        let sessions = sessions.clone();
        let active = active.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, bus, connected.clone(), key_store, sessions).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    bus: PublishBus,
    connected: Arc<ConnectedRegistry>,
    key_store: Arc<saltcore_crypto::KeyStore>,
    sessions: Arc<crate::registry::SessionRegistry>,
) {
    let announce = match FrameTransport::recv(&mut stream).await {
        Ok(Some(frame)) => frame,
        _ => {
            debug!(%peer, "publisher connection closed before announce");
            return;
        }
    };
    let Payload::Announce(announce) = announce.payload else {
        warn!(%peer, "publisher connection's first frame was not an announce; closing");
        return;
    };
    if let Err(reason) = verify_announce(&announce, &key_store, &sessions).await {
        warn!(%peer, minion_id = %announce.minion_id, %reason, "rejecting announce");
        return;
    }

    let facts = announce.facts.clone();
    connected.insert(announce.minion_id.clone(), facts).await;
    info!(minion_id = %announce.minion_id, %peer, "minion announced on publisher");

    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if FrameTransport::send(&mut stream, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(minion_id = %announce.minion_id, skipped, "publisher connection lagged, disconnecting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            recv = FrameTransport::recv(&mut stream) => {
                match recv {
                    Ok(Some(_)) => continue, // pings etc. from the minion; nothing to act on here
                    _ => break,
                }
            }
        }
    }

    connected.remove(&announce.minion_id).await;
    info!(minion_id = %announce.minion_id, "minion disconnected from publisher");
}

async fn verify_announce(
    announce: &Announce,
    key_store: &saltcore_crypto::KeyStore,
    sessions: &crate::registry::SessionRegistry,
) -> Result<(), &'static str> {
    let record = key_store.find(&announce.minion_id).await.map_err(|_| "key store error")?;
    let record = record.ok_or("unknown minion_id")?;
    if record.state != saltcore_crypto::KeyState::Accepted {
        return Err("minion_id is not accepted");
    }
    let signable = format!("{}:{}", announce.minion_id, announce.session_key_id);
    saltcore_crypto::verify(&record.signing_public_key, signable.as_bytes(), &announce.signature)
        .map_err(|_| "signature does not verify")?;

    let entry = sessions.entry(&announce.minion_id).await.ok_or("no session issued for this minion")?;
    let generation = entry.generation.read().await;
    if generation.current.key_id != announce.session_key_id
        && !generation.previous.as_ref().is_some_and(|p| p.key_id == announce.session_key_id)
    {
        return Err("announce names a stale session_key_id");
    }
    Ok(())
}
