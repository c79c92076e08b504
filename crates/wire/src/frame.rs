//! Length-prefixed frame I/O: `| u32 length | payload |`.
//!
//! The length prefix is big-endian and counts only the bytes that follow.
//! Frames above [`MAX_FRAME_BYTES`] are rejected without reading the body,
//! so a hostile or confused peer cannot force an unbounded allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum frame size: 2^24 bytes (16 MiB), per the wire spec.
pub const MAX_FRAME_BYTES: u32 = 1 << 24;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {got} bytes exceeds the {max}-byte limit")]
    TooLarge { max: u32, got: u32 },
    #[error("connection closed mid-frame")]
    Truncated,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    let len = payload.len();
    if len as u64 > MAX_FRAME_BYTES as u64 {
        return Err(FrameError::TooLarge { max: MAX_FRAME_BYTES, got: len as u32 });
    }
    w.write_u32(len as u32).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF before
/// any bytes of the next frame arrived (the caller should simply stop
/// reading); a partial frame is [`FrameError::Truncated`].
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let len = match r.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge { max: MAX_FRAME_BYTES, got: len });
    }
    let mut buf = vec![0u8; len as usize];
    match r.read_exact(&mut buf).await {
        Ok(_) => Ok(Some(buf)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(e) => Err(e.into()),
    }
}
