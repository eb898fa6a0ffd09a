//! Filesystem-call adapter over a reconnecting client.
//!
//! [`RemoteFs`] presents POSIX-shaped operations (`getattr`, `readdir`,
//! `open`, `write`, ...) that return data or an errno, the shape a FUSE-style
//! integration needs. On top of one [`SftpClient`](crate::client::SftpClient)
//! it adds:
//!
//! - TTL caches for attributes, directory listings and symlink targets
//! - An optional local metadata file answering `getattr` and `readdir`
//! - An optional record of which files were read
//! - Write coalescing per descriptor, flushed before reads and on release
//! - Automatic reconnection with geometric backoff
//!
//! # Example
//!
//! ```rust,ignore
//! use sftp_pipe::adapter::{AdapterConfig, RemoteFs};
//! use sftp_pipe::transport::WebSocketConnector;
//!
//! let fs = RemoteFs::new(WebSocketConnector::new("ws://127.0.0.1:4000/"), AdapterConfig::default());
//! fs.connect().await?;
//! let names = fs.readdir("/").await?;
//! ```

mod backoff;
mod cache;
mod config;
mod metadata;
mod remote;
mod tracking;

pub use backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_FACTOR, DEFAULT_MAX_DELAY};
pub use cache::DEFAULT_CACHE_CAPACITY;
pub use config::{AdapterConfig, DEFAULT_CACHE_TIMEOUT, DEFAULT_WRITE_COALESCE_LIMIT};
pub use metadata::{MetadataFile, METADATA_RELOAD_INTERVAL};
pub use remote::{AdapterState, Errno, FsResult, RemoteFs, Stat};
pub use tracking::ReadTracking;
