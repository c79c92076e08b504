//! Master process-group: publisher, request server, worker pool, auth
//! state machine, and the shared registries/indices they coordinate
//! through. See `saltcore-wire` for the shared message types and
//! `saltcore-crypto` for the key store and session-key engine.

pub mod auth;
pub mod config;
pub mod error;
pub mod events_egress;
pub mod jobs;
pub mod publisher;
pub mod registry;
pub mod request_server;
pub mod rotation;
pub mod state;
pub mod worker;

use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tracing::info;

use crate::config::MasterConfig;
use crate::state::MasterState;
use crate::worker::WorkerPool;

/// Run the master until one of its listeners fails. Startup failures
/// (unreadable key store, unwritable job cache, a port already in use) are
/// fatal and bubble up through `anyhow`; everything after startup is
/// peer-caused and handled per §7 without tearing the process down.
pub async fn run(config: MasterConfig) -> anyhow::Result<()> {
    let worker_count = config.worker_count();
    let queue_capacity = 256;
    let publish_addr = config.publish_addr();
    let request_addr = config.request_addr();
    let events_socket_path = config.events_socket_path();
    let pub_max_connections = config.pub_max_connections;

    let state = Arc::new(MasterState::new(config)?);
    info!(
        fingerprint = %saltcore_crypto::fingerprint(&state.master_keys.public_key_bytes()),
        "master identity loaded"
    );

    let publish_listener = TcpListener::bind(&publish_addr).await?;
    let request_listener = TcpListener::bind(&request_addr).await?;
    if let Some(parent) = events_socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&events_socket_path);
    let events_listener = UnixListener::bind(&events_socket_path)?;

    let pool = WorkerPool::spawn(worker_count, state.clone(), queue_capacity);

    info!(%publish_addr, "publisher listening");
    info!(%request_addr, "request server listening");
    info!(path = %events_socket_path.display(), "event bus egress listening");

    tokio::spawn(rotation::run(state.clone()));
    tokio::spawn(reap_loop(state.clone()));
    tokio::spawn(events_egress::serve(events_listener, state.events.clone()));

    let publisher_task = tokio::spawn(publisher::serve(
        publish_listener,
        state.publish_bus.clone(),
        state.connected.clone(),
        state.key_store.clone(),
        state.sessions.clone(),
        pub_max_connections,
    ));
    let request_task = tokio::spawn(request_server::serve(request_listener, pool, state.clone()));

    tokio::select! {
        result = publisher_task => result??,
        result = request_task => result??,
    }
    Ok(())
}

async fn reap_loop(state: Arc<MasterState>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        ticker.tick().await;
        let ttl = std::time::Duration::from_secs(state.config.job_cache_ttl);
        match state.jobs.reap_expired(ttl).await {
            Ok(0) => {}
            Ok(count) => info!(count, "reaped expired job cache entries"),
            Err(err) => tracing::warn!(%err, "job cache reap failed"),
        }
    }
}
