//! Shared wire types for the master/minion message-routing fabric:
//! length-prefixed framing, message shapes, and target-expression matching.
//!
//! This crate has no knowledge of sockets beyond the `AsyncRead`/`AsyncWrite`
//! bound in [`transport::FrameTransport`] — the master and minion binaries
//! own their own TCP/Unix listeners and dial logic.

pub mod frame;
pub mod message;
pub mod target;
pub mod transport;

pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_BYTES};
pub use message::{
    Announce, AuthRequest, AuthResponse, EventMessage, Frame, GatherMode, Kind, KeyBundle, Payload,
    PublishBody, PublishEnvelope, ReturnBody, ReturnEnvelope, SessionRotateAck,
    SessionRotateEnvelope, SubmitRequest, SubmitResponse, TargetKind,
};
pub use target::{matches, IdentityFacts};
pub use transport::{FrameTransport, TransportError};
