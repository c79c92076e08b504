//! Shared master-side registries: per-minion session/publish key material,
//! and the set of minions currently connected to the publisher (used by the
//! target resolver at submit time).

use std::collections::HashMap;
use std::sync::Arc;

use saltcore_crypto::session::{mint_publish_key, mint_session_key, Direction, SessionKeyState};
use saltcore_crypto::CryptoError;
use saltcore_wire::{Frame, IdentityFacts};
use tokio::sync::{mpsc, RwLock};

/// A minion's session-key generation: the key in current use, plus (during
/// the grace window right after a rotation push) the previous key, so an
/// already-in-flight return sealed under the old key still verifies
/// (§8 scenario 5).
pub struct SessionGeneration {
    pub current: Arc<SessionKeyState>,
    pub previous: Option<Arc<SessionKeyState>>,
}

pub struct SessionEntry {
    pub generation: RwLock<SessionGeneration>,
    /// Sender into the minion's open return connection, so a rotation can
    /// push a `session_rotate` frame to it out of band. `None` once the
    /// connection has closed.
    pub return_channel: RwLock<Option<mpsc::Sender<Frame>>>,
}

/// Per-minion session key state, keyed by `minion_id`.
#[derive(Default)]
pub struct SessionRegistry {
    entries: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh session key for `minion_id`, replacing any prior entry
    /// outright (used at initial auth, where there is no "previous" key to
    /// preserve).
    pub async fn mint(&self, minion_id: &str) -> Result<Arc<SessionKeyState>, CryptoError> {
        let (key_id, raw) = mint_session_key()?;
        let state = Arc::new(SessionKeyState::new(key_id, raw));
        let entry = Arc::new(SessionEntry {
            generation: RwLock::new(SessionGeneration { current: state.clone(), previous: None }),
            return_channel: RwLock::new(None),
        });
        self.entries.write().await.insert(minion_id.to_string(), entry);
        Ok(state)
    }

    /// Rotate `minion_id`'s session key, keeping the outgoing key as
    /// `previous` so already-queued traffic still opens.
    pub async fn rotate(&self, minion_id: &str) -> Result<Arc<SessionKeyState>, CryptoError> {
        let (key_id, raw) = mint_session_key()?;
        let new_state = Arc::new(SessionKeyState::new(key_id, raw));
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(minion_id) {
            let mut generation = entry.generation.write().await;
            generation.previous = Some(generation.current.clone());
            generation.current = new_state.clone();
        }
        Ok(new_state)
    }

    /// Drop the `previous` generation for `minion_id` once its rotation has
    /// been acknowledged.
    pub async fn clear_previous(&self, minion_id: &str) {
        if let Some(entry) = self.entries.read().await.get(minion_id) {
            entry.generation.write().await.previous = None;
        }
    }

    pub async fn entry(&self, minion_id: &str) -> Option<Arc<SessionEntry>> {
        self.entries.read().await.get(minion_id).cloned()
    }

    pub async fn set_return_channel(&self, minion_id: &str, tx: mpsc::Sender<Frame>) {
        if let Some(entry) = self.entries.read().await.get(minion_id) {
            *entry.return_channel.write().await = Some(tx);
        }
    }

    pub async fn clear_return_channel(&self, minion_id: &str) {
        if let Some(entry) = self.entries.read().await.get(minion_id) {
            *entry.return_channel.write().await = None;
        }
    }

    /// Open `ciphertext` against whichever generation (`current` or
    /// `previous`) the frame's `key_id` names. Returns the plaintext and
    /// which generation matched (`true` if it was `current`).
    pub async fn open_for(
        &self,
        minion_id: &str,
        key_id: &str,
        nonce: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let entry = self.entries.read().await.get(minion_id).cloned().ok_or(CryptoError::UnknownMinion)?;
        let generation = entry.generation.read().await;
        if generation.current.key_id == key_id {
            return generation.current.open(Direction::MinionToMaster, nonce, ciphertext);
        }
        if let Some(previous) = &generation.previous {
            if previous.key_id == key_id {
                return previous.open(Direction::MinionToMaster, nonce, ciphertext);
            }
        }
        Err(CryptoError::Forged)
    }

    pub async fn all_minion_ids(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

/// The master's current broadcast publish key, shared by every connected
/// minion. Rotated independently of any single minion's session key.
pub struct PublishKeyRegistry {
    current: RwLock<Arc<SessionKeyState>>,
}

impl PublishKeyRegistry {
    pub fn new() -> Result<Self, CryptoError> {
        let raw = mint_publish_key()?;
        let key_id = uuid::Uuid::new_v4().to_string();
        Ok(Self { current: RwLock::new(Arc::new(SessionKeyState::new(key_id, raw))) })
    }

    pub async fn current(&self) -> Arc<SessionKeyState> {
        self.current.read().await.clone()
    }

    pub async fn rotate(&self) -> Result<Arc<SessionKeyState>, CryptoError> {
        let raw = mint_publish_key()?;
        let key_id = uuid::Uuid::new_v4().to_string();
        let fresh = Arc::new(SessionKeyState::new(key_id, raw));
        *self.current.write().await = fresh.clone();
        Ok(fresh)
    }
}

/// A minion currently connected to the publisher: just its identity facts,
/// used by the master-side target resolver. Fan-out to the connection
/// itself goes over a shared `broadcast` channel (see `publisher.rs`)
/// rather than a per-connection sender, since the publisher is stateless
/// with respect to targeting (§4.4) — every connected minion gets the same
/// frame.
pub struct ConnectedMinion {
    pub facts: IdentityFacts,
}

/// The set of minions currently connected to the publisher. This is the
/// "connected-accepted set" the target resolver and §8's invariants refer
/// to — minions that connect after a publish never join an already-resolved
/// job's target set, because resolution reads this registry once, at
/// submit time.
#[derive(Default)]
pub struct ConnectedRegistry {
    minions: RwLock<HashMap<String, ConnectedMinion>>,
}

impl ConnectedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, minion_id: String, facts: IdentityFacts) {
        self.minions.write().await.insert(minion_id, ConnectedMinion { facts });
    }

    pub async fn remove(&self, minion_id: &str) {
        self.minions.write().await.remove(minion_id);
    }

    /// Snapshot `(minion_id, facts)` pairs for every currently connected
    /// minion, for the resolver to match a target expression against.
    pub async fn snapshot(&self) -> Vec<(String, IdentityFacts)> {
        self.minions.read().await.iter().map(|(id, m)| (id.clone(), m.facts.clone())).collect()
    }

    pub async fn len(&self) -> usize {
        self.minions.read().await.len()
    }
}

#[cfg(test)]
mod connected_registry_tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_inserts_and_removes() {
        let registry = ConnectedRegistry::new();
        registry.insert("m1".to_string(), IdentityFacts::new("m1")).await;
        registry.insert("m2".to_string(), IdentityFacts::new("m2")).await;
        assert_eq!(registry.len().await, 2);

        registry.remove("m1").await;
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "m2");
    }
}
