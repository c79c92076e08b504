//! Shared master state: every long-lived task (request server connections,
//! workers, the publisher, the session-rotation timer) holds an `Arc` of
//! this, never a direct reference to another task's private state.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use saltcore_crypto::{KeyStore, SigningKeyPair};

use crate::config::MasterConfig;
use crate::jobs::JobsIndex;
use crate::publisher::PublishBus;
use crate::registry::{ConnectedRegistry, PublishKeyRegistry, SessionRegistry};

pub struct MasterState {
    pub config: MasterConfig,
    pub master_keys: SigningKeyPair,
    pub key_store: Arc<KeyStore>,
    pub sessions: Arc<SessionRegistry>,
    pub publish_keys: Arc<PublishKeyRegistry>,
    pub connected: Arc<ConnectedRegistry>,
    pub jobs: Arc<JobsIndex>,
    pub events: Arc<saltcore_eventbus::EventBus>,
    pub publish_bus: PublishBus,
    /// Count of connections closed for `protocol_violation` (§7: never
    /// surfaced to a peer, only counted).
    pub protocol_violations: AtomicU64,
}

impl MasterState {
    pub fn new(config: MasterConfig) -> anyhow::Result<Self> {
        let master_key_path = config.keys_dir.join("master.pk8");
        let master_keys = saltcore_crypto::load_or_create_master_keys(&master_key_path)?;
        let key_store = Arc::new(KeyStore::new(config.keys_dir.join("minions"))?);
        let jobs = Arc::new(JobsIndex::new(&config.jobs_dir)?);
        let publish_keys = Arc::new(PublishKeyRegistry::new()?);
        let events = Arc::new(saltcore_eventbus::EventBus::new(config.event_bus_backlog));
        let publish_bus = PublishBus::new(config.publisher_send_queue_capacity);
        Ok(Self {
            master_keys,
            key_store,
            sessions: Arc::new(SessionRegistry::new()),
            publish_keys,
            connected: Arc::new(ConnectedRegistry::new()),
            jobs,
            events,
            publish_bus,
            protocol_violations: AtomicU64::new(0),
            config,
        })
    }
}
