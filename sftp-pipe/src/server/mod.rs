//! Server components.
//!
//! This module provides:
//!
//! - `Filesystem`: Capability a session serves requests from
//! - `LocalFilesystem`: Local-disk backend
//! - `SafeFilesystem`: Confines a backend to one directory
//! - `Session`: Per-connection dispatcher
//! - `SftpServer`: WebSocket accept loop
//! - `ServerConfig`: Session tuning
//!
//! # Example
//!
//! ```rust,ignore
//! use sftp_pipe::server::{LocalFilesystem, SafeFilesystem, SessionOptions, SftpServer};
//!
//! let fs = SafeFilesystem::new(LocalFilesystem::new(), "/srv/files", SessionOptions::default())?;
//! SftpServer::new(fs).serve("127.0.0.1:4000").await?;
//! ```

mod config;
mod handler;
mod listener;
mod local;
mod safe;
mod session;

pub use config::{ServerConfig, DEFAULT_READDIR_BUDGET};
pub use handler::{BackendHandle, Filesystem, HASH_ALGORITHMS};
pub use listener::SftpServer;
pub use local::{metadata_to_attrs, LocalFilesystem};
pub use safe::{normalize, SafeFilesystem, SessionOptions};
pub use session::{serve_channel, Session, SessionState};
