//! The publisher-subscribe connection (§4.4, §4.8): a long-lived TCP
//! connection that announces this minion's identity, then receives every
//! broadcast publish envelope the master signs. Verification, decryption,
//! and target matching happen here; matched jobs are handed to the
//! executor and the receive loop never blocks on their completion.

use std::sync::Arc;

use saltcore_crypto::session::Direction;
use saltcore_wire::{Announce, Frame, FrameTransport, Payload, PublishBody};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::MinionError;
use crate::executor::{ExecJob, RunnerOpts};
use crate::state::MinionState;

pub async fn run(state: Arc<MinionState>, session_key_id: String) -> Result<(), MinionError> {
    let mut stream = TcpStream::connect(state.config.publish_addr()).await?;
    let signable = format!("{}:{session_key_id}", state.minion_id);
    let announce = Announce {
        minion_id: state.minion_id.clone(),
        session_key_id,
        facts: state.facts.clone(),
        signature: state.signing_keys.sign(signable.as_bytes()),
    };
    FrameTransport::send(&mut stream, &Frame::new(Payload::Announce(announce))).await?;

    loop {
        let frame = FrameTransport::recv(&mut stream).await?;
        let Some(frame) = frame else { return Ok(()) };
        let Payload::Publish(envelope) = frame.payload else {
            debug!("non-publish frame on publisher connection; ignoring");
            continue;
        };

        let Some(master_key) = state.master_signing_public_key.read().await.clone() else {
            warn!("publish arrived before the master's signing key was pinned; dropping");
            continue;
        };
        let signable = match serde_json::to_vec(&Payload::Publish(envelope.clone())) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to re-encode publish for signature check; dropping");
                continue;
            }
        };
        let Some(signature) = &frame.signature else {
            warn!(jid = %envelope.jid, "publish frame carries no signature; dropping");
            continue;
        };
        if saltcore_crypto::verify(&master_key, &signable, signature).is_err() {
            warn!(jid = %envelope.jid, "publish signature does not verify; dropping");
            continue;
        }

        let Some(publish_key) = state.current_publish_key().await else {
            warn!(jid = %envelope.jid, "no publish key on file yet; dropping");
            continue;
        };
        let nonce = frame.nonce.unwrap_or(0);
        let plaintext = match publish_key.open(Direction::MasterToMinion, nonce, &envelope.ciphertext) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                warn!(jid = %envelope.jid, %err, "publish envelope did not decrypt; dropping");
                continue;
            }
        };
        let body: PublishBody = match serde_json::from_slice(&plaintext) {
            Ok(body) => body,
            Err(err) => {
                warn!(jid = %envelope.jid, %err, "malformed publish body; dropping");
                continue;
            }
        };

        if !saltcore_wire::matches(body.target_kind, &body.target_expr, &state.facts) {
            continue; // not targeted at this minion; dropped silently, no negative ack (§4.8 step 2)
        }

        state.executor.submit(ExecJob {
            jid: envelope.jid.clone(),
            opts: RunnerOpts { func: body.func, args: body.args, kwargs: body.kwargs },
        });
    }
}
