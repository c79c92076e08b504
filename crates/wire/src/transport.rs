//! Transport-agnostic frame send/receive.
//!
//! Per the re-architecture notes, the core is written against a small
//! transport interface rather than assuming a particular socket type
//! directly. [`FrameTransport`] is that seam: a blanket implementation
//! covers any `AsyncRead + AsyncWrite` (TCP, Unix, or an in-memory duplex
//! used by tests), so production code and tests share one code path for
//! frame (de)serialization. The raw TCP/Unix wiring lives in each binary's
//! `transport` module; no other implementation is shipped — the original
//! system's pluggable transport loader is out of scope here.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::frame::{read_frame, write_frame, FrameError};
use crate::message::Frame;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("malformed frame body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

/// Send and receive [`Frame`]s over an underlying byte stream.
#[async_trait]
pub trait FrameTransport: Send {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Returns `Ok(None)` on a clean close between frames.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

#[async_trait]
impl<T> FrameTransport for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame.to_bytes()?;
        write_frame(self, &bytes).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match read_frame(self).await? {
            Some(bytes) => Ok(Some(Frame::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    #[tokio::test]
    async fn round_trips_a_frame_over_a_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let frame = Frame::new(Payload::Ping);
        FrameTransport::send(&mut a, &frame).await.expect("send");
        let got = FrameTransport::recv(&mut b).await.expect("recv").expect("some");
        assert!(matches!(got.payload, Payload::Ping));
    }
}
