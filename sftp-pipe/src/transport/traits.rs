//! Transport trait definitions.
//!
//! A transport is a bidirectional channel of discrete binary messages. Each
//! message carries one protocol frame; framing below that level (WebSocket
//! opcodes, masking, fragmentation) is the transport's business.

use std::io;

/// Sending half of a message channel.
#[async_trait::async_trait]
pub trait MessageSink: Send {
    /// Send one binary message.
    async fn send(&mut self, message: Vec<u8>) -> Result<(), TransportError>;

    /// Close the channel. Further sends fail.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a message channel.
#[async_trait::async_trait]
pub trait MessageStream: Send {
    /// Next message. `None` means the peer closed the channel cleanly.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}

/// A connected channel, ready to be split between a reader and a writer task.
pub struct Channel {
    sink: Box<dyn MessageSink>,
    stream: Box<dyn MessageStream>,
}

impl Channel {
    pub fn new(sink: Box<dyn MessageSink>, stream: Box<dyn MessageStream>) -> Self {
        Self { sink, stream }
    }

    /// Split into send and receive halves for concurrent I/O.
    pub fn into_split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens new channels. Used by the reconnecting adapter.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Channel, TransportError>;
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Connection closed")]
    Closed,

    #[error("Non-binary message received")]
    NonBinaryMessage,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(e) => e,
            TransportError::ConnectionRefused => {
                io::Error::new(io::ErrorKind::ConnectionRefused, err)
            }
            TransportError::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            TransportError::NonBinaryMessage => io::Error::new(io::ErrorKind::InvalidData, err),
            TransportError::WebSocket(_) => io::Error::new(io::ErrorKind::ConnectionReset, err),
        }
    }
}
