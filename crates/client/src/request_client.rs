//! Request-server connection for the `submit_request`/`submit_response`
//! leg of the local client (§4.5, §4.9): a single short-lived TCP
//! round-trip, since the client has no ongoing session to maintain.

use saltcore_wire::{Frame, FrameTransport, Payload, SubmitRequest, SubmitResponse};
use tokio::net::TcpStream;

use crate::error::ClientError;

/// Submit a job and return the master's synchronous reply.
pub async fn submit(addr: &str, request: SubmitRequest) -> Result<SubmitResponse, ClientError> {
    let mut stream = TcpStream::connect(addr).await?;
    FrameTransport::send(&mut stream, &Frame::new(Payload::SubmitRequest(request))).await?;
    let frame = FrameTransport::recv(&mut stream).await?.ok_or(ClientError::ConnectionClosed)?;
    match frame.payload {
        Payload::SubmitResponse(response) => Ok(response),
        _ => Err(ClientError::ConnectionClosed),
    }
}
