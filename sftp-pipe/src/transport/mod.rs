//! Transport layer for the file protocol.
//!
//! This module provides message-channel abstractions and two implementations:
//!
//! - **WebSocket**: For remote clients (binary messages, `sftp` subprotocol)
//! - **Memory**: In-process pair for tests and embedding
//!
//! # Example
//!
//! ```rust,ignore
//! use sftp_pipe::transport::{memory, websocket};
//!
//! // Remote server
//! let channel = websocket::connect("ws://127.0.0.1:4000/").await?;
//!
//! // In-process (for testing)
//! let (client_side, server_side) = memory::pair(64);
//! ```

pub mod memory;
mod traits;
pub mod websocket;

pub use traits::{Channel, Connector, MessageSink, MessageStream, TransportError};
pub use websocket::WebSocketConnector;
