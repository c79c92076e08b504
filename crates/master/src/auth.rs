//! Authentication state machine, master side (§4.7).
//!
//! Pure with respect to the wire: given an `AuthRequest` and the shared
//! key/session state, produces the `AuthResponse` to send back. Called from
//! a worker task; does not touch any socket itself.

use saltcore_crypto::keystore::KeyState;
use saltcore_crypto::{CryptoError, EphemeralAgreement, KeyStore};
use saltcore_wire::{AuthRequest, AuthResponse, KeyBundle};

use crate::registry::{PublishKeyRegistry, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("malformed key bundle: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drive one `auth_request` to completion, mutating the key store and
/// session registry as the protocol in §4.7 requires.
pub async fn handle_auth_request(
    request: &AuthRequest,
    master_signing_public_key: &[u8],
    key_store: &KeyStore,
    sessions: &SessionRegistry,
    publish_keys: &PublishKeyRegistry,
    open_mode: bool,
) -> Result<AuthResponse, AuthError> {
    let record = key_store.register_minion_key(&request.minion_id, &request.signing_public_key).await;
    let record = match record {
        Ok(record) => record,
        Err(CryptoError::DuplicateMinionId) => {
            // A different key is already on file for this minion_id under
            // some non-rejected state: per §4.7 step 2, that is `denied`.
            return Ok(AuthResponse::Denied);
        }
        Err(other) => return Err(other.into()),
    };

    let record = if open_mode && record.state == KeyState::Pending {
        key_store.accept(&request.minion_id).await?
    } else {
        record
    };

    match record.state {
        KeyState::Pending => Ok(AuthResponse::Pending),
        KeyState::Rejected => Ok(AuthResponse::Rejected),
        KeyState::Denied => Ok(AuthResponse::Denied),
        KeyState::Accepted => {
            if record.signing_public_key != request.signing_public_key {
                // Stored key differs from what this handshake presented.
                return Ok(AuthResponse::Denied);
            }
            let session_key = sessions.mint(&request.minion_id).await?;
            let publish_key = publish_keys.current().await;

            let agreement = EphemeralAgreement::generate()?;
            let master_ephemeral_public_key = agreement.public_key_bytes.clone();
            let sealing_key = agreement
                .derive_sealing_key(&request.encryption_public_key, b"saltcore-auth-accept")?;
            let bundle = KeyBundle {
                session_key: session_key.expose_raw().to_vec(),
                publish_key: publish_key.expose_raw().to_vec(),
            };
            let plaintext = serde_json::to_vec(&bundle)?;
            let sealed_keys = saltcore_crypto::seal_sealed_box(&sealing_key, &plaintext)?;

            Ok(AuthResponse::Accepted {
                session_key_id: session_key.key_id.clone(),
                master_ephemeral_public_key,
                sealed_keys,
                master_signing_public_key: master_signing_public_key.to_vec(),
            })
        }
    }
}
