//! Native error to protocol status translation.
//!
//! Every errno a backend reports becomes a status code plus a short tag
//! (`"ENOENT"`, `"EEXIST"`, ...) carried as the status message. Clients map
//! the tag back to an errno, so precise codes survive the trip even though the
//! protocol's own status vocabulary is tiny.

use super::types::StatusCode;
use std::io;

/// (errno, status, tag)
const ERRNO_TABLE: &[(i32, StatusCode, &str)] = &[
    (libc::ENOENT, StatusCode::NoSuchFile, "ENOENT"),
    (libc::ENODEV, StatusCode::NoSuchFile, "ENODEV"),
    (libc::EACCES, StatusCode::PermissionDenied, "EACCES"),
    (libc::ENOSYS, StatusCode::OpUnsupported, "ENOSYS"),
    (libc::EEXIST, StatusCode::Failure, "EEXIST"),
    (libc::ENOTEMPTY, StatusCode::Failure, "ENOTEMPTY"),
    (libc::EPERM, StatusCode::Failure, "EPERM"),
    (libc::EBADF, StatusCode::Failure, "EBADF"),
    (libc::EINVAL, StatusCode::Failure, "EINVAL"),
    (libc::EISDIR, StatusCode::Failure, "EISDIR"),
    (libc::ENOTDIR, StatusCode::Failure, "ENOTDIR"),
    (libc::EIO, StatusCode::Failure, "EIO"),
    (libc::EROFS, StatusCode::Failure, "EROFS"),
    (libc::ENOSPC, StatusCode::Failure, "ENOSPC"),
    (libc::ELOOP, StatusCode::Failure, "ELOOP"),
    (libc::EXDEV, StatusCode::Failure, "EXDEV"),
    (libc::ENAMETOOLONG, StatusCode::Failure, "ENAMETOOLONG"),
    (libc::EMFILE, StatusCode::Failure, "EMFILE"),
    (libc::ENFILE, StatusCode::Failure, "ENFILE"),
    (libc::ENOMEM, StatusCode::Failure, "ENOMEM"),
    (libc::EBUSY, StatusCode::Failure, "EBUSY"),
    (libc::EAGAIN, StatusCode::Failure, "EAGAIN"),
    (libc::ESPIPE, StatusCode::Failure, "ESPIPE"),
    (libc::ECANCELED, StatusCode::Failure, "ECANCELED"),
];

/// Message sent when a request fails for reasons other than a filesystem error.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Message sent for operations on closed or unknown handles.
pub const INVALID_HANDLE_MESSAGE: &str = "Invalid handle";

/// Translate an errno into a status code and message.
pub fn errno_status(errno: i32) -> (StatusCode, String) {
    match ERRNO_TABLE.iter().find(|(e, _, _)| *e == errno) {
        Some((_, code, tag)) => (*code, (*tag).to_string()),
        None => (StatusCode::Failure, format!("Unknown error ({})", errno)),
    }
}

/// Translate an I/O error. Errors without an errno are internal failures.
pub fn io_error_status(err: &io::Error) -> (StatusCode, String) {
    match err.raw_os_error() {
        Some(errno) => errno_status(errno),
        None => match err.kind() {
            io::ErrorKind::NotFound => errno_status(libc::ENOENT),
            io::ErrorKind::PermissionDenied => errno_status(libc::EACCES),
            io::ErrorKind::AlreadyExists => errno_status(libc::EEXIST),
            io::ErrorKind::InvalidInput => errno_status(libc::EINVAL),
            io::ErrorKind::Unsupported => errno_status(libc::ENOSYS),
            _ => (StatusCode::Failure, INTERNAL_ERROR_MESSAGE.to_string()),
        },
    }
}

/// Errno named by a status tag, if the tag is one we emit.
pub fn errno_from_tag(tag: &str) -> Option<i32> {
    ERRNO_TABLE
        .iter()
        .find(|(_, _, t)| *t == tag)
        .map(|(e, _, _)| *e)
}

/// Tag for an errno, e.g. `"ENOENT"`.
pub fn errno_tag(errno: i32) -> Option<&'static str> {
    ERRNO_TABLE
        .iter()
        .find(|(e, _, _)| *e == errno)
        .map(|(_, _, t)| *t)
}

/// Best errno for a status received from a peer.
pub fn status_errno(code: StatusCode, message: &str) -> i32 {
    if let Some(errno) = errno_from_tag(message) {
        return errno;
    }
    match code {
        StatusCode::Ok => 0,
        StatusCode::Eof => libc::EIO,
        StatusCode::NoSuchFile => libc::ENOENT,
        StatusCode::PermissionDenied => libc::EACCES,
        StatusCode::OpUnsupported => libc::ENOSYS,
        StatusCode::NoConnection => libc::ENOTCONN,
        StatusCode::ConnectionLost => libc::ECONNRESET,
        StatusCode::BadMessage => libc::EBADMSG,
        StatusCode::Failure => libc::EIO,
    }
}
