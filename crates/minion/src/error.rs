//! Minion-side error taxonomy (§7).

#[derive(Debug, thiserror::Error)]
pub enum MinionError {
    #[error("auth rejected by master; will not retry without operator intervention")]
    AuthRejected,
    #[error("auth denied by master: conflicting public key on file; halting")]
    AuthDenied,
    #[error("master's signing key does not match the cached trust-on-first-use key")]
    MasterKeyMismatch,
    #[error(transparent)]
    Crypto(#[from] saltcore_crypto::CryptoError),
    #[error(transparent)]
    Transport(#[from] saltcore_wire::TransportError),
    #[error("malformed key bundle: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection to the master closed unexpectedly")]
    ConnectionClosed,
    #[error("unrecoverable startup failure: {0}")]
    Startup(String),
}
