//! Shared minion state: identity, the current session/publish keys, and the
//! executor pool. Held behind an `Arc` by every long-lived task (the
//! publisher-subscribe loop, the request-server connection, the return
//! forwarder).

use std::sync::Arc;

use saltcore_crypto::session::SessionKeyState;
use saltcore_crypto::SigningKeyPair;
use saltcore_eventbus::EventBus;
use saltcore_wire::IdentityFacts;
use tokio::sync::RwLock;

use crate::config::MinionConfig;
use crate::executor::Executor;

pub struct MinionState {
    pub config: MinionConfig,
    pub minion_id: String,
    pub facts: IdentityFacts,
    pub signing_keys: SigningKeyPair,
    /// `None` until the auth handshake completes; replaced wholesale on
    /// rotation (no "previous" generation on the minion side — it is the
    /// side that initiates every seal, so it always uses whatever is
    /// current).
    pub session_key: RwLock<Option<Arc<SessionKeyState>>>,
    pub publish_key: RwLock<Option<Arc<SessionKeyState>>>,
    pub master_signing_public_key: RwLock<Option<Vec<u8>>>,
    pub local_bus: EventBus,
    pub executor: Executor,
}

impl MinionState {
    pub async fn set_keys(&self, session_key: Arc<SessionKeyState>, publish_key: Arc<SessionKeyState>) {
        *self.session_key.write().await = Some(session_key);
        *self.publish_key.write().await = Some(publish_key);
    }

    pub async fn current_session_key(&self) -> Option<Arc<SessionKeyState>> {
        self.session_key.read().await.clone()
    }

    pub async fn current_publish_key(&self) -> Option<Arc<SessionKeyState>> {
        self.publish_key.read().await.clone()
    }
}
