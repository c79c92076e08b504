//! Idempotent load-or-create for the master's long-lived signing identity.

use std::path::Path;

use crate::error::CryptoError;
use crate::sign::SigningKeyPair;

/// Load the signing keypair at `path`, generating and persisting a new one
/// if it does not yet exist. Safe to call on every startup.
pub fn load_or_create_master_keys(path: &Path) -> Result<SigningKeyPair, CryptoError> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        return SigningKeyPair::from_pkcs8(&bytes);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let keypair = SigningKeyPair::generate()?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, keypair.pkcs8_bytes())?;
    set_owner_only_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(keypair)
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), CryptoError> {
    Ok(())
}
