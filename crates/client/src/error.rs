//! Client-side error taxonomy (§7): the local client surfaces errors
//! directly to its caller rather than through the event bus, since it has
//! no downstream of its own.

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("submit was rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] saltcore_wire::TransportError),
    #[error("request server closed the connection before replying")]
    ConnectionClosed,
    #[error(transparent)]
    Crypto(#[from] saltcore_crypto::CryptoError),
    #[error("malformed event payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gather_mode fail_on_any_missing: minion(s) {0:?} never returned before the deadline")]
    MissingMinions(Vec<String>),
}
