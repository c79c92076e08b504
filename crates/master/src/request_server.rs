//! Request server (§4.5): a single TCP listener that demultiplexes three
//! kinds of unicast traffic — minion auth requests, minion returns, and
//! local-client submits — onto the worker pool. It does no cryptographic
//! work itself; every frame it can't recognize is a `protocol_violation`
//! and the connection is closed without a reply.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use saltcore_wire::{AuthResponse, Frame, FrameTransport, Payload};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::MasterError;
use crate::state::MasterState;
use crate::worker::{WorkItem, WorkerPool};

pub async fn serve(
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    state: Arc<MasterState>,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let pool = pool.clone();
        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, pool, state).await;
        });
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, pool: Arc<WorkerPool>, state: Arc<MasterState>) {
    let read_timeout = state.config.socket_read_timeout();
    let write_timeout = state.config.socket_write_timeout();
    let (rotate_tx, mut rotate_rx) = mpsc::channel::<Frame>(8);
    let mut minion_id: Option<String> = None;

    loop {
        tokio::select! {
            biased;
            rotate = rotate_rx.recv(), if minion_id.is_some() => {
                let Some(frame) = rotate else { continue };
                if send_frame(&mut stream, &frame, write_timeout).await.is_err() {
                    break;
                }
            }
            recv = tokio::time::timeout(read_timeout, FrameTransport::recv(&mut stream)) => {
                match recv {
                    Ok(Ok(Some(frame))) => {
                        if !dispatch_frame(frame, &mut stream, &pool, &state, &mut minion_id, &rotate_tx, write_timeout).await {
                            break;
                        }
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(err)) => {
                        state.protocol_violations.fetch_add(1, Ordering::Relaxed);
                        let violation = MasterError::from(err);
                        debug!(%peer, %violation, reason = violation.as_protocol_reason(), "closing connection on transport error");
                        break;
                    }
                    Err(_elapsed) => {
                        debug!(%peer, "closing idle connection on read timeout");
                        break;
                    }
                }
            }
        }
    }

    if let Some(id) = &minion_id {
        state.sessions.clear_return_channel(id).await;
    }
}

/// Returns `false` when the connection should be closed.
#[allow(clippy::too_many_arguments)]
async fn dispatch_frame(
    frame: Frame,
    stream: &mut TcpStream,
    pool: &Arc<WorkerPool>,
    state: &Arc<MasterState>,
    minion_id: &mut Option<String>,
    rotate_tx: &mpsc::Sender<Frame>,
    write_timeout: Duration,
) -> bool {
    match frame.payload {
        Payload::AuthRequest(request) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            pool.dispatch(WorkItem::Auth { request: request.clone(), reply: reply_tx }).await;
            let response = reply_rx.await.unwrap_or(AuthResponse::Denied);
            if let AuthResponse::Accepted { .. } = &response {
                *minion_id = Some(request.minion_id.clone());
                state.sessions.set_return_channel(&request.minion_id, rotate_tx.clone()).await;
            }
            send_frame(stream, &Frame::new(Payload::AuthResponse(response)), write_timeout).await.is_ok()
        }
        Payload::SubmitRequest(request) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            pool.dispatch(WorkItem::Submit { request, reply: reply_tx }).await;
            let response = reply_rx
                .await
                .unwrap_or_else(|_| saltcore_wire::SubmitResponse::Rejected { reason: "worker_crash".to_string() });
            send_frame(stream, &Frame::new(Payload::SubmitResponse(response)), write_timeout).await.is_ok()
        }
        Payload::Return(envelope) => {
            let nonce = frame.nonce.unwrap_or(0);
            pool.dispatch(WorkItem::Return { envelope, nonce }).await;
            true
        }
        Payload::SessionRotateAck(_ack) => {
            if let Some(id) = minion_id.clone() {
                pool.dispatch(WorkItem::SessionRotateAck { minion_id: id }).await;
            }
            true
        }
        Payload::Ping => send_frame(stream, &Frame::new(Payload::Ping), write_timeout).await.is_ok(),
        other => {
            state.protocol_violations.fetch_add(1, Ordering::Relaxed);
            let violation = MasterError::ProtocolViolation(format!("unexpected frame kind: {:?}", other.kind()));
            warn!(%violation, reason = violation.as_protocol_reason(), "closing connection on request server");
            false
        }
    }
}

async fn send_frame(stream: &mut TcpStream, frame: &Frame, write_timeout: Duration) -> Result<(), ()> {
    match tokio::time::timeout(write_timeout, FrameTransport::send(stream, frame)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
