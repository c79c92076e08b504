//! The local event handler that picks up a completed executor's tagged
//! result off the local event bus and sends it over the return connection,
//! encrypted under the current session key (§4.8 step 4). Ordering
//! guarantee: nothing is sent until the executor's result event has been
//! fully materialized and published.

use std::sync::Arc;

use saltcore_crypto::session::Direction;
use saltcore_wire::ReturnBody;
use tokio::sync::mpsc;
use tracing::warn;

use crate::state::MinionState;

/// A sealed return plus the nonce counter it was sealed with, which must
/// travel alongside it on the `Frame` (the nonce is a sibling of the
/// envelope on the wire, not inside it).
pub struct PendingReturn {
    pub envelope: saltcore_wire::ReturnEnvelope,
    pub nonce: u64,
}

pub async fn run(state: Arc<MinionState>, return_tx: mpsc::Sender<PendingReturn>) {
    let mut subscription = state.local_bus.subscribe("exec");
    while let Some(event) = subscription.recv().await {
        let Some(jid) = event.tag.strip_prefix("exec/").and_then(|rest| rest.strip_suffix("/done")) else {
            continue;
        };
        let Some(session_key) = state.current_session_key().await else {
            warn!(%jid, "executor finished before a session key was available; dropping return");
            continue;
        };
        let success = event.data.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        let result = event.data.get("result").cloned().unwrap_or(serde_json::Value::Null);
        let body = ReturnBody { success, result };
        let plaintext = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%jid, %err, "failed to encode return body");
                continue;
            }
        };
        let (ciphertext, nonce) = match session_key.seal(Direction::MinionToMaster, &plaintext) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(%jid, %err, "failed to seal return");
                continue;
            }
        };
        let envelope = saltcore_wire::ReturnEnvelope {
            jid: jid.to_string(),
            minion_id: state.minion_id.clone(),
            key_id: session_key.key_id.clone(),
            ciphertext,
        };
        if return_tx.send(PendingReturn { envelope, nonce }).await.is_err() {
            return;
        }
    }
}
