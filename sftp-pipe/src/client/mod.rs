//! Client with request multiplexing over one channel.
//!
//! Any number of tasks may issue operations on a shared [`SftpClient`]
//! concurrently; each request is tagged with an id and its response is
//! routed back by that id, in whatever order the server completes them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐ ┌────────┐ ┌────────┐
//! │ task 0 │ │ task 1 │ │ task 2 │   callers
//! └───┬────┘ └───┬────┘ └───┬────┘
//!     └──────────┼──────────┘
//!                │
//!         ┌──────┴──────┐
//!         │  SftpClient │  writer task + reader task
//!         └──────┬──────┘
//!                │ channel
//!         ┌──────┴──────┐
//!         │   Server    │
//!         └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sftp_pipe::client::{ClientOptions, SftpClient};
//! use sftp_pipe::transport::websocket;
//!
//! let channel = websocket::connect("ws://127.0.0.1:4000/").await?;
//! let client = SftpClient::connect(channel, ClientOptions::default()).await?;
//! for item in client.read_dir("/").await? {
//!     println!("{}", item.longname);
//! }
//! ```

mod error;
mod handle;
mod multiplexer;

pub use error::SftpError;
pub use handle::{Handle, HandleKind};
pub use multiplexer::{ClientOptions, SftpClient};
