//! Ephemeral X25519 key agreement, used only to seal a [`crate::session::KeyBundle`]
//! to a minion during the auth handshake.
//!
//! `ring`'s `EphemeralPrivateKey` deliberately cannot be persisted or reused
//! across agreements — which fits this protocol exactly, since every TCP
//! session runs a fresh handshake anyway (§4.7: a minion re-authenticates on
//! every new connection). There is no long-lived encryption keypair to
//! manage; only the long-lived signing identity in [`crate::sign`] persists.

use crate::error::CryptoError;

struct Okm32;

impl ring::hkdf::KeyType for Okm32 {
    fn len(&self) -> usize {
        32
    }
}

/// One side of an ephemeral X25519 handshake.
pub struct EphemeralAgreement {
    private: ring::agreement::EphemeralPrivateKey,
    pub public_key_bytes: Vec<u8>,
}

impl EphemeralAgreement {
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = ring::rand::SystemRandom::new();
        let private = ring::agreement::EphemeralPrivateKey::generate(&ring::agreement::X25519, &rng)
            .map_err(|_| CryptoError::Crypto)?;
        let public = private.compute_public_key().map_err(|_| CryptoError::Crypto)?;
        Ok(Self { private, public_key_bytes: public.as_ref().to_vec() })
    }

    /// Consume the ephemeral private key, deriving a 32-byte symmetric key
    /// via ECDH(self, peer) through HKDF-SHA256 with the given `info` label.
    pub fn derive_sealing_key(
        self,
        peer_public_key: &[u8],
        info: &[u8],
    ) -> Result<[u8; 32], CryptoError> {
        let peer = ring::agreement::UnparsedPublicKey::new(&ring::agreement::X25519, peer_public_key);
        let outcome: Result<Result<[u8; 32], CryptoError>, ring::error::Unspecified> =
            ring::agreement::agree_ephemeral(self.private, &peer, |shared_secret| {
                hkdf_sha256(shared_secret, info)
            });
        outcome.map_err(|_| CryptoError::Crypto)?
    }
}

fn hkdf_sha256(ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let salt = ring::hkdf::Salt::new(ring::hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(ikm);
    let okm = prk.expand(&[info], Okm32).map_err(|_| CryptoError::Crypto)?;
    let mut out = [0u8; 32];
    okm.fill(&mut out).map_err(|_| CryptoError::Crypto)?;
    Ok(out)
}
