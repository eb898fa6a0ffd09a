//! Client-visible errors.

use crate::protocol::{errno_tag, status_errno, DecodeError, StatusCode};

/// Failure of a client operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SftpError {
    /// The server answered with an error status.
    #[error("{message} ({status:?})")]
    Status { status: StatusCode, message: String },

    /// The channel closed before a response arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer broke the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The handle was closed or never opened on this connection.
    #[error("Invalid handle")]
    InvalidHandle,
}

impl SftpError {
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        SftpError::Status {
            status,
            message: message.into(),
        }
    }

    /// Native errno equivalent.
    pub fn errno(&self) -> i32 {
        match self {
            SftpError::Status { status, message } => status_errno(*status, message),
            SftpError::ConnectionClosed => libc::ENOTCONN,
            SftpError::Protocol(_) => libc::EPROTO,
            SftpError::InvalidHandle => libc::EBADF,
        }
    }

    /// Errno-style code such as `"ENOENT"`; `"EFAILURE"` when there is none.
    pub fn code(&self) -> &'static str {
        errno_tag(self.errno()).unwrap_or("EFAILURE")
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        match self {
            SftpError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.errno() == libc::ENOENT
    }
}

impl From<DecodeError> for SftpError {
    fn from(err: DecodeError) -> Self {
        SftpError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_map_to_errno() {
        let err = SftpError::status(StatusCode::NoSuchFile, "ENOENT");
        assert_eq!(err.errno(), libc::ENOENT);
        assert_eq!(err.code(), "ENOENT");
        assert!(err.is_not_found());

        let err = SftpError::status(StatusCode::Failure, "ENOTEMPTY");
        assert_eq!(err.errno(), libc::ENOTEMPTY);
        assert_eq!(err.description(), "ENOTEMPTY");

        let err = SftpError::status(StatusCode::Failure, "Unknown error (99)");
        assert_eq!(err.code(), "EIO");
    }

    #[test]
    fn test_local_errors() {
        assert_eq!(SftpError::InvalidHandle.errno(), libc::EBADF);
        assert_eq!(SftpError::InvalidHandle.description(), "Invalid handle");
        assert_eq!(SftpError::ConnectionClosed.errno(), libc::ENOTCONN);
        assert_eq!(SftpError::Protocol("x".into()).code(), "EFAILURE");
    }
}
