//! Shared helpers for the client-side commands.

use anyhow::{Context, Result};
use sftp_pipe::transport::websocket;
use sftp_pipe::{ClientOptions, FileAttrs, SftpClient};

/// Connect and complete the protocol handshake.
pub async fn connect(url: &str) -> Result<SftpClient> {
    let channel = websocket::connect(url)
        .await
        .with_context(|| format!("connecting to {}", url))?;
    let span = tracing::info_span!("client", %url);
    SftpClient::connect(channel, ClientOptions::default().span(span))
        .await
        .context("protocol handshake")
}

/// `rwxr-xr-x` style rendering of the permission bits.
pub fn permission_string(mode: u32) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    BITS.iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

pub fn kind_name(attrs: &FileAttrs) -> &'static str {
    if attrs.is_dir() {
        "directory"
    } else if attrs.is_symlink() {
        "symlink"
    } else if attrs.is_file() {
        "file"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o755), "rwxr-xr-x");
        assert_eq!(permission_string(0o100640), "rw-r-----");
        assert_eq!(permission_string(0), "---------");
    }
}
