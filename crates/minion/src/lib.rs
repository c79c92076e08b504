//! Minion endpoint: two persistent TCP connections (publisher-subscribe and
//! request-server-return), the auth state machine that establishes both,
//! and the local executor/event-bus plumbing in between. See
//! `saltcore-wire` for the shared message types.

pub mod config;
pub mod connection_publish;
pub mod connection_request;
pub mod error;
pub mod executor;
pub mod facts;
pub mod identity;
pub mod return_forwarder;
pub mod state;

use std::sync::Arc;

use saltcore_eventbus::EventBus;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, warn};

use crate::config::MinionConfig;
use crate::error::MinionError;
use crate::executor::{EchoRunner, Executor};
use crate::state::MinionState;

/// Run the minion until a fatal condition (`auth_rejected`, `auth_denied`,
/// or a master-key mismatch) occurs. Ordinary connection loss is not fatal:
/// the minion reconnects and re-authenticates from scratch, matching "a
/// minion re-authenticates on every new connection" (§4.7).
pub async fn run(config: MinionConfig) -> Result<(), MinionError> {
    std::fs::create_dir_all(&config.state_dir)?;
    let minion_id = identity::resolve_minion_id(&config)?;
    let signing_keys = identity::load_or_create_signing_keys(&config.identity_key_path())?;
    let facts = facts::load_facts(&minion_id, config.facts_file.as_deref())?;

    let local_bus = EventBus::new(1024);
    let executor = Executor::spawn(Arc::new(EchoRunner), local_bus.clone(), config.executor_cap, config.executor_backlog);

    let state = Arc::new(MinionState {
        config,
        minion_id: minion_id.clone(),
        facts,
        signing_keys,
        session_key: RwLock::new(None),
        publish_key: RwLock::new(None),
        master_signing_public_key: RwLock::new(None),
        local_bus,
        executor,
    });

    tracing::info!(%minion_id, "minion starting");

    loop {
        let (stream, session_key_id) = match connection_request::connect_and_authenticate(&state).await {
            Ok(outcome) => outcome,
            Err(err @ MinionError::AuthRejected) | Err(err @ MinionError::AuthDenied) => {
                error!(%err, "auth handshake failed fatally; halting");
                return Err(err);
            }
            Err(err @ MinionError::MasterKeyMismatch) => {
                error!(%err, "refusing to trust a different master identity; halting");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let (return_tx, return_rx) = mpsc::channel(256);
        let forwarder = tokio::spawn(return_forwarder::run(state.clone(), return_tx));
        let publisher = tokio::spawn(connection_publish::run(state.clone(), session_key_id));

        let result = connection_request::serve_after_auth(state.clone(), stream, return_rx).await;
        forwarder.abort();
        publisher.abort();

        match result {
            Ok(()) => warn!("request connection closed by the master; reconnecting"),
            Err(err) => warn!(%err, "request connection lost; reconnecting"),
        }
    }
}
