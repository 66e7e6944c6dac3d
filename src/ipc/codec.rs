//! Line framing shared by the server and the client.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use super::protocol::ProtocolError;

/// One newline-delimited JSON stream
pub struct Connection<S> {
    framed: Framed<S, LinesCodec>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wrap a stream; longer lines are rejected with `FrameTooLong`
    pub fn new(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(max_frame_bytes)),
        }
    }

    /// Next frame. `Disconnected` when the peer closed the stream.
    pub async fn recv(&mut self) -> Result<String, ProtocolError> {
        match self.framed.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(e.into()),
            None => Err(ProtocolError::Disconnected),
        }
    }

    /// Send a raw frame (must not contain a newline)
    pub async fn send_line(&mut self, line: String) -> Result<(), ProtocolError> {
        self.framed.send(line).await.map_err(ProtocolError::from)
    }

    /// Serialize and send one value
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        let line = serde_json::to_string(value).map_err(|e| ProtocolError::Io(e.into()))?;
        self.send_line(line).await
    }
}
