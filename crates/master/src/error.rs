//! Master-side error taxonomy (§7). Every variant maps to one of the named
//! wire-level conditions; nothing here is fatal to the master as a whole
//! except [`MasterError::Startup`], which can only occur before any socket
//! is opened.

#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("minion auth pending")]
    AuthPending,
    #[error("minion auth rejected")]
    AuthRejected,
    #[error("minion auth denied")]
    AuthDenied,
    #[error("unauthorized publish: {0}")]
    UnauthorizedPublish(String),
    #[error("replay detected, session key rotated")]
    ReplayDetected,
    #[error(transparent)]
    Crypto(#[from] saltcore_crypto::CryptoError),
    #[error(transparent)]
    Transport(#[from] saltcore_wire::TransportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unrecoverable startup failure: {0}")]
    Startup(String),
}

impl MasterError {
    /// The reason string carried back in a `protocol_violation` wire
    /// condition, for the cases that should close the connection rather
    /// than reply.
    pub fn as_protocol_reason(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::AuthPending => "auth_pending",
            Self::AuthRejected => "auth_rejected",
            Self::AuthDenied => "auth_denied",
            Self::UnauthorizedPublish(_) => "unauthorized_publish",
            Self::ReplayDetected => "replay_detected",
            Self::Crypto(_) => "crypto_error",
            Self::Transport(_) => "protocol_violation",
            Self::Io(_) => "io_error",
            Self::Startup(_) => "startup_failure",
        }
    }
}
