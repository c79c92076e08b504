//! On-disk minion key store: pending/accepted/rejected/denied states, one
//! record per `minion_id`, with atomic writes and per-`minion_id` locking.
//!
//! Records live as JSON files under `<root>/{pending,accepted,rejected,denied}/<minion_id>`.
//! A minion moves between exactly those four directories over its lifetime;
//! `KeyStore` enforces that moves go through `delete`-then-`write` so a
//! concurrent reader never observes a record in two states at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Pending,
    Accepted,
    Rejected,
    Denied,
}

impl KeyState {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Denied => "denied",
        }
    }

    const ALL: [KeyState; 4] = [Self::Pending, Self::Accepted, Self::Rejected, Self::Denied];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub minion_id: String,
    pub signing_public_key: Vec<u8>,
    pub state: KeyState,
    pub fingerprint: String,
}

/// Root of the on-disk key store, with an in-process per-`minion_id` lock so
/// concurrent auth attempts for the same minion serialize. The master is a
/// single process group in this implementation, so an in-process
/// `tokio::sync::Mutex` is sufficient; a multi-process deployment would need
/// a filesystem lock instead.
pub struct KeyStore {
    root: PathBuf,
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CryptoError> {
        let root = root.into();
        for state in KeyState::ALL {
            std::fs::create_dir_all(root.join(state.dir_name()))?;
        }
        Ok(Self { root, locks: RwLock::new(HashMap::new()) })
    }

    async fn lock_for(&self, minion_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(minion_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(minion_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn path_in(&self, state: KeyState, minion_id: &str) -> PathBuf {
        self.root.join(state.dir_name()).join(minion_id)
    }

    fn find_any_state(&self, minion_id: &str) -> Result<Option<KeyRecord>, CryptoError> {
        for state in KeyState::ALL {
            let path = self.path_in(state, minion_id);
            if path.exists() {
                let bytes = std::fs::read(&path)?;
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
        }
        Ok(None)
    }

    fn write_atomic(&self, record: &KeyRecord) -> Result<(), CryptoError> {
        let path = self.path_in(record.state, &record.minion_id);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_from(&self, state: KeyState, minion_id: &str) -> Result<(), CryptoError> {
        let path = self.path_in(state, minion_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Look up a minion's key record in whichever state it currently holds.
    pub async fn find(&self, minion_id: &str) -> Result<Option<KeyRecord>, CryptoError> {
        let lock = self.lock_for(minion_id).await;
        let _guard = lock.lock().await;
        self.find_any_state(minion_id)
    }

    /// Register a newly seen `(minion_id, signing_public_key)` pair as
    /// pending. If a record already exists for this `minion_id` with a
    /// *different* public key, the existing record is moved into `denied`
    /// (unless it is already there) and the registration is refused
    /// (`DuplicateMinionId`) per the one-identity-per-minion_id invariant.
    /// Re-registering the same key is a no-op that returns the existing
    /// record's state.
    pub async fn register_minion_key(
        &self,
        minion_id: &str,
        signing_public_key: &[u8],
    ) -> Result<KeyRecord, CryptoError> {
        let lock = self.lock_for(minion_id).await;
        let _guard = lock.lock().await;
        if let Some(existing) = self.find_any_state(minion_id)? {
            if existing.signing_public_key != signing_public_key {
                if existing.state != KeyState::Denied {
                    self.write_transition(existing, KeyState::Denied)?;
                }
                return Err(CryptoError::DuplicateMinionId);
            }
            return Ok(existing);
        }
        let record = KeyRecord {
            minion_id: minion_id.to_string(),
            signing_public_key: signing_public_key.to_vec(),
            state: KeyState::Pending,
            fingerprint: crate::sign::fingerprint(signing_public_key),
        };
        self.write_atomic(&record)?;
        Ok(record)
    }

    /// Move `record` into state `to`, persisting the new copy before
    /// removing the old one. Caller must already hold `record.minion_id`'s
    /// lock.
    fn write_transition(&self, mut record: KeyRecord, to: KeyState) -> Result<KeyRecord, CryptoError> {
        let from = record.state;
        if from == to {
            return Ok(record);
        }
        record.state = to;
        self.write_atomic(&record)?;
        self.remove_from(from, &record.minion_id)?;
        Ok(record)
    }

    async fn transition(&self, minion_id: &str, to: KeyState) -> Result<KeyRecord, CryptoError> {
        let lock = self.lock_for(minion_id).await;
        let _guard = lock.lock().await;
        let record = self.find_any_state(minion_id)?.ok_or(CryptoError::UnknownMinion)?;
        self.write_transition(record, to)
    }

    /// Accept a `pending` record. Per §4.2, accepting from any other
    /// state (already accepted, rejected, denied) is `bad_state`: a
    /// quarantined key must go through `delete` and re-registration, not a
    /// direct re-accept.
    pub async fn accept(&self, minion_id: &str) -> Result<KeyRecord, CryptoError> {
        let lock = self.lock_for(minion_id).await;
        let _guard = lock.lock().await;
        let record = self.find_any_state(minion_id)?.ok_or(CryptoError::UnknownMinion)?;
        if record.state != KeyState::Pending {
            return Err(CryptoError::BadState);
        }
        self.write_transition(record, KeyState::Accepted)
    }

    pub async fn reject(&self, minion_id: &str) -> Result<KeyRecord, CryptoError> {
        self.transition(minion_id, KeyState::Rejected).await
    }

    /// Remove a minion's key record entirely, from whichever state it is in.
    pub async fn delete(&self, minion_id: &str) -> Result<(), CryptoError> {
        let lock = self.lock_for(minion_id).await;
        let _guard = lock.lock().await;
        let record = self.find_any_state(minion_id)?.ok_or(CryptoError::UnknownMinion)?;
        self.remove_from(record.state, minion_id)
    }

    /// List every record currently in `state`.
    pub async fn list(&self, state: KeyState) -> Result<Vec<KeyRecord>, CryptoError> {
        let dir = self.root.join(state.dir_name());
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            let bytes = std::fs::read(&path)?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
