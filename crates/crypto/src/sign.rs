//! Ed25519 identity / signing keys.
//!
//! The master's long-lived signing keypair authenticates publish envelopes
//! and `auth_response` frames; a minion's signing public key is the
//! identity the key store persists and the uniqueness invariant binds to.

use ring::signature::KeyPair;

use crate::error::CryptoError;

/// A long-lived Ed25519 signing keypair.
pub struct SigningKeyPair {
    keypair: ring::signature::Ed25519KeyPair,
    pkcs8: Vec<u8>,
}

impl SigningKeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = ring::rand::SystemRandom::new();
        let doc = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| CryptoError::Crypto)?;
        Self::from_pkcs8(doc.as_ref())
    }

    /// Load a keypair from its PKCS#8 encoding.
    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, CryptoError> {
        let keypair =
            ring::signature::Ed25519KeyPair::from_pkcs8(bytes).map_err(|_| CryptoError::Crypto)?;
        Ok(Self { keypair, pkcs8: bytes.to_vec() })
    }

    /// PKCS#8 bytes, for persistence.
    pub fn pkcs8_bytes(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public_key().as_ref().to_vec()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).as_ref().to_vec()
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key = ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, public_key);
    key.verify(message, signature).map_err(|_| CryptoError::Forged)
}

/// SHA-256 fingerprint of a public key, hex-encoded, for human-facing display
/// (e.g. an admin tool confirming a minion's key before accepting it).
pub fn fingerprint(public_key: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, public_key);
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_and_verifies() {
        let kp = SigningKeyPair::generate().expect("generate");
        let sig = kp.sign(b"hello");
        verify(&kp.public_key_bytes(), b"hello", &sig).expect("verify");
    }

    #[test]
    fn rejects_tampered_message() {
        let kp = SigningKeyPair::generate().expect("generate");
        let sig = kp.sign(b"hello");
        assert!(verify(&kp.public_key_bytes(), b"goodbye", &sig).is_err());
    }

    #[test]
    fn round_trips_through_pkcs8() {
        let kp = SigningKeyPair::generate().expect("generate");
        let reloaded = SigningKeyPair::from_pkcs8(kp.pkcs8_bytes()).expect("reload");
        assert_eq!(kp.public_key_bytes(), reloaded.public_key_bytes());
    }

    #[test]
    fn fingerprint_is_stable() {
        let kp = SigningKeyPair::generate().expect("generate");
        assert_eq!(fingerprint(&kp.public_key_bytes()), fingerprint(&kp.public_key_bytes()));
    }
}
