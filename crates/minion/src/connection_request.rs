//! The request-server connection (§4.7, §4.8): one long-running TCP
//! connection used to authenticate, send returns, and receive proactive
//! `session_rotate` pushes and pings from the master.
//!
//! A minion re-authenticates on every new connection (a fresh ephemeral ECDH
//! handshake is cheap and the channel carries no state worth preserving
//! across a reconnect).

use std::sync::Arc;

use saltcore_crypto::session::{Direction, SessionKeyState};
use saltcore_crypto::EphemeralAgreement;
use saltcore_wire::{
    AuthRequest, AuthResponse, Frame, FrameTransport, KeyBundle, Payload, SessionRotateAck,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::MinionError;
use crate::identity;
use crate::return_forwarder::PendingReturn;
use crate::state::MinionState;

enum Attempt {
    Accepted(TcpStream, String),
    Pending,
}

/// Drive the auth state machine to completion, retrying on `pending` with
/// exponential backoff bounded at `auth_backoff_max`. Returns the
/// authenticated connection and the session_key_id the minion should
/// announce on its publisher connection.
pub async fn connect_and_authenticate(
    state: &Arc<MinionState>,
) -> Result<(TcpStream, String), MinionError> {
    let mut backoff = state.config.auth_backoff_initial();
    loop {
        match attempt_once(state).await? {
            Attempt::Accepted(stream, session_key_id) => return Ok((stream, session_key_id)),
            Attempt::Pending => {
                warn!(?backoff, "auth pending; retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(state.config.auth_backoff_max());
            }
        }
    }
}

async fn attempt_once(state: &Arc<MinionState>) -> Result<Attempt, MinionError> {
    let mut stream = TcpStream::connect(state.config.request_addr()).await?;
    let agreement = EphemeralAgreement::generate()?;
    let request = AuthRequest {
        minion_id: state.minion_id.clone(),
        signing_public_key: state.signing_keys.public_key_bytes(),
        encryption_public_key: agreement.public_key_bytes.clone(),
        token: state.config.auth_token.clone(),
    };
    FrameTransport::send(&mut stream, &Frame::new(Payload::AuthRequest(request))).await?;
    let frame = FrameTransport::recv(&mut stream).await?.ok_or(MinionError::ConnectionClosed)?;
    let Payload::AuthResponse(response) = frame.payload else {
        return Err(MinionError::ConnectionClosed);
    };

    match response {
        AuthResponse::Pending => Ok(Attempt::Pending),
        AuthResponse::Rejected => Err(MinionError::AuthRejected),
        AuthResponse::Denied => Err(MinionError::AuthDenied),
        AuthResponse::Accepted {
            session_key_id,
            master_ephemeral_public_key,
            sealed_keys,
            master_signing_public_key,
        } => {
            identity::verify_or_pin_master_key(
                &state.config.master_pubkey_cache_path(),
                &master_signing_public_key,
            )?;
            *state.master_signing_public_key.write().await = Some(master_signing_public_key);

            let sealing_key =
                agreement.derive_sealing_key(&master_ephemeral_public_key, b"saltcore-auth-accept")?;
            let plaintext = saltcore_crypto::open_sealed_box(&sealing_key, &sealed_keys)?;
            let bundle: KeyBundle = serde_json::from_slice(&plaintext)?;
            let session_key = Arc::new(SessionKeyState::new(session_key_id.clone(), to_raw(&bundle.session_key)?));
            let publish_key = Arc::new(SessionKeyState::new("publish".to_string(), to_raw(&bundle.publish_key)?));
            state.set_keys(session_key, publish_key).await;
            info!(minion_id = %state.minion_id, %session_key_id, "authenticated");
            Ok(Attempt::Accepted(stream, session_key_id))
        }
    }
}

fn to_raw(bytes: &[u8]) -> Result<[u8; 32], MinionError> {
    <[u8; 32]>::try_from(bytes).map_err(|_| MinionError::Crypto(saltcore_crypto::CryptoError::Crypto))
}

/// Serve the authenticated connection until it closes or errors: forward
/// returns arriving on `return_rx` to the master, and handle
/// `session_rotate`/`ping` pushes from it.
pub async fn serve_after_auth(
    state: Arc<MinionState>,
    mut stream: TcpStream,
    mut return_rx: mpsc::Receiver<PendingReturn>,
) -> Result<(), MinionError> {
    let read_timeout = state.config.socket_read_timeout();
    let write_timeout = state.config.socket_write_timeout();
    loop {
        tokio::select! {
            biased;
            pending = return_rx.recv() => {
                let Some(pending) = pending else { return Ok(()) };
                let frame = Frame::new(Payload::Return(pending.envelope)).with_nonce(pending.nonce);
                tokio::time::timeout(write_timeout, FrameTransport::send(&mut stream, &frame)).await.map_err(|_| MinionError::ConnectionClosed)??;
            }
            recv = tokio::time::timeout(read_timeout, FrameTransport::recv(&mut stream)) => {
                let frame = recv.map_err(|_| MinionError::ConnectionClosed)??;
                let Some(frame) = frame else { return Ok(()) };
                match frame.payload {
                    Payload::SessionRotate(envelope) => {
                        let Some(current) = state.current_session_key().await else { continue };
                        if current.key_id != envelope.old_key_id {
                            warn!("session_rotate names an unknown old_key_id; ignoring");
                            continue;
                        }
                        let nonce = frame.nonce.unwrap_or(0);
                        let plaintext = current.open(Direction::MasterToMinion, nonce, &envelope.ciphertext)?;
                        let bundle: KeyBundle = serde_json::from_slice(&plaintext)?;
                        let new_session = Arc::new(SessionKeyState::new(envelope.new_key_id.clone(), to_raw(&bundle.session_key)?));
                        let new_publish = Arc::new(SessionKeyState::new("publish".to_string(), to_raw(&bundle.publish_key)?));
                        state.set_keys(new_session, new_publish).await;
                        let ack = Frame::new(Payload::SessionRotateAck(SessionRotateAck { new_key_id: envelope.new_key_id.clone() }));
                        tokio::time::timeout(write_timeout, FrameTransport::send(&mut stream, &ack)).await.map_err(|_| MinionError::ConnectionClosed)??;
                        info!(new_key_id = %envelope.new_key_id, "session key rotated");
                    }
                    Payload::Ping => {
                        tokio::time::timeout(write_timeout, FrameTransport::send(&mut stream, &Frame::new(Payload::Ping))).await.map_err(|_| MinionError::ConnectionClosed)??;
                    }
                    other => {
                        warn!(kind = ?other.kind(), "unexpected frame on request connection; ignoring");
                    }
                }
            }
        }
    }
}
