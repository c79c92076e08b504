//! Minion-local identity: the long-lived signing keypair presented on every
//! `auth_request`, a persisted `minion_id`, and the trust-on-first-use cache
//! of the master's signing public key.

use std::path::Path;

use saltcore_crypto::SigningKeyPair;

use crate::config::MinionConfig;
use crate::error::MinionError;

/// Load this minion's identity, generating and persisting one on first run.
pub fn load_or_create_signing_keys(path: &Path) -> Result<SigningKeyPair, MinionError> {
    Ok(saltcore_crypto::load_or_create_master_keys(path)?)
}

/// Resolve the configured `minion_id`, or load/generate a persisted one.
/// A generated id is a random UUID; it is written once and reused on every
/// subsequent start so the master always sees the same identity.
pub fn resolve_minion_id(config: &MinionConfig) -> Result<String, MinionError> {
    if let Some(id) = &config.minion_id {
        return Ok(id.clone());
    }
    let path = config.minion_id_path();
    if path.exists() {
        return Ok(std::fs::read_to_string(&path)?.trim().to_string());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &id)?;
    Ok(id)
}

/// Load the cached master signing public key, if any. `None` means this is
/// the minion's first successful handshake — trust-on-first-use has not yet
/// pinned a key.
pub fn load_cached_master_key(path: &Path) -> Result<Option<Vec<u8>>, MinionError> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read(path)?))
}

/// Pin `key` as the trusted master signing key for future handshakes.
pub fn cache_master_key(path: &Path, key: &[u8]) -> Result<(), MinionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, key)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Verify `presented` against whatever is cached, pinning it if this is the
/// first handshake. Fatal (§7 "signature mismatch on master_pub") if a
/// different key was already pinned.
pub fn verify_or_pin_master_key(path: &Path, presented: &[u8]) -> Result<(), MinionError> {
    match load_cached_master_key(path)? {
        None => cache_master_key(path, presented),
        Some(cached) if cached == presented => Ok(()),
        Some(_) => Err(MinionError::MasterKeyMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_handshake_pins_the_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.pub");
        verify_or_pin_master_key(&path, b"key-a").expect("pin");
        assert_eq!(load_cached_master_key(&path).expect("load"), Some(b"key-a".to_vec()));
    }

    #[test]
    fn matching_key_on_subsequent_handshake_is_fine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.pub");
        verify_or_pin_master_key(&path, b"key-a").expect("pin");
        verify_or_pin_master_key(&path, b"key-a").expect("re-verify");
    }

    #[test]
    fn differing_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("master.pub");
        verify_or_pin_master_key(&path, b"key-a").expect("pin");
        let err = verify_or_pin_master_key(&path, b"key-b").unwrap_err();
        assert!(matches!(err, MinionError::MasterKeyMismatch));
    }
}
