//! SFTP-style file protocol over message channels.
//!
//! `sftp-pipe` provides a complete stack for remote file access:
//!
//! - **Protocol**: Packet codec for SFTP v3 plus the openssh extensions
//! - **Transport**: WebSocket and in-memory message channels
//! - **Client**: Request multiplexer over one channel
//! - **Server**: Per-connection session dispatcher over a pluggable backend
//! - **Adapter**: POSIX-style calls with caching and reconnection
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sftp_pipe::{LocalFilesystem, SafeFilesystem, SessionOptions, SftpServer};
//!
//! // Serve one directory
//! let fs = SafeFilesystem::new(LocalFilesystem::new(), "/srv/files", SessionOptions::default())?;
//! SftpServer::new(fs).serve("127.0.0.1:4000").await?;
//! ```
//!
//! ```rust,ignore
//! use sftp_pipe::{transport::websocket, ClientOptions, SftpClient};
//!
//! let channel = websocket::connect("ws://127.0.0.1:4000/").await?;
//! let client = SftpClient::connect(channel, ClientOptions::default()).await?;
//! let attrs = client.stat("/a.txt").await?;
//! ```

pub mod adapter;
pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export the common entry points at crate root
pub use adapter::{AdapterConfig, AdapterState, RemoteFs, Stat};
pub use client::{ClientOptions, Handle, SftpClient, SftpError};
pub use protocol::{FileAttrs, Item, OpenFlags, StatusCode, VfsStats};
pub use server::{
    Filesystem, LocalFilesystem, SafeFilesystem, ServerConfig, SessionOptions, SftpServer,
};
pub use transport::{Channel, Connector, WebSocketConnector};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::client::{ClientOptions, Handle, SftpClient, SftpError};
    pub use crate::protocol::{FileAttrs, Item, OpenFlags, StatusCode};
    pub use crate::server::{Filesystem, ServerConfig};
}
