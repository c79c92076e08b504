//! Background session-key rotation (§4.7 step 5, §6 `session_rotate_interval`).
//!
//! On each tick, every currently-authenticated minion is sent a fresh
//! session key sealed under its *current* key (the channel is already
//! mutually authenticated, so a new ECDH handshake would be redundant —
//! see `saltcore_crypto::seal`'s module doc). The old generation is kept as
//! `previous` until the minion acknowledges, so an in-flight return sealed
//! under it still verifies (§8 scenario 5).

use std::sync::Arc;

use saltcore_crypto::session::Direction;
use saltcore_wire::{Frame, KeyBundle, Payload, SessionRotateEnvelope};
use tracing::{error, warn};

use crate::state::MasterState;

pub async fn run(state: Arc<MasterState>) {
    let Some(interval) = state.config.session_rotate_interval() else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        ticker.tick().await;
        let minion_ids = state.sessions.all_minion_ids().await;
        for minion_id in minion_ids {
            if let Err(err) = rotate_one(&state, &minion_id).await {
                warn!(%minion_id, %err, "session rotation push failed");
            }
        }
    }
}

async fn rotate_one(state: &Arc<MasterState>, minion_id: &str) -> Result<(), saltcore_crypto::CryptoError> {
    let Some(entry) = state.sessions.entry(minion_id).await else {
        return Ok(());
    };
    let old = entry.generation.read().await.current.clone();
    let new_state = state.sessions.rotate(minion_id).await?;

    let bundle = KeyBundle {
        session_key: new_state.expose_raw().to_vec(),
        publish_key: state.publish_keys.current().await.expose_raw().to_vec(),
    };
    let plaintext = serde_json::to_vec(&bundle).map_err(|_| saltcore_crypto::CryptoError::Crypto)?;
    let (ciphertext, nonce) = old.seal(Direction::MasterToMinion, &plaintext)?;
    let envelope = SessionRotateEnvelope {
        old_key_id: old.key_id.clone(),
        new_key_id: new_state.key_id.clone(),
        ciphertext,
    };
    let frame = Frame::new(Payload::SessionRotate(envelope)).with_nonce(nonce);

    let channel = entry.return_channel.read().await.clone();
    match channel {
        Some(tx) => {
            if tx.send(frame).await.is_err() {
                error!(%minion_id, "return channel closed; could not push session_rotate");
            }
        }
        None => warn!(%minion_id, "no open return channel to push session_rotate over"),
    }
    Ok(())
}
