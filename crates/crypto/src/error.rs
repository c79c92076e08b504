//! Crypto/key-store error taxonomy.

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed key record: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown minion_id")]
    UnknownMinion,
    #[error("a different public key is already on file for this minion_id")]
    DuplicateMinionId,
    #[error("state transition not valid from the record's current state")]
    BadState,
    #[error("authenticated decryption failed (forged or corrupt ciphertext)")]
    Forged,
    #[error("nonce at or below the highest seen for this key and direction")]
    Replay,
    #[error("cryptographic operation failed")]
    Crypto,
}
