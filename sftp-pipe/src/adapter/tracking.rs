//! Record which files have been read.
//!
//! The first read of each file appends its root-relative name plus a NUL
//! byte to the tracking file. Deleting the tracking file resets the history.

use dashmap::DashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug)]
pub struct ReadTracking {
    path: PathBuf,
    seen: DashSet<String>,
}

impl ReadTracking {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            seen: DashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty the tracking file and forget the history.
    pub async fn reset(&self) {
        self.seen.clear();
        if let Err(e) = tokio::fs::write(&self.path, b"").await {
            tracing::warn!(target: "sftp-pipe::tracking", path = %self.path.display(), error = %e, "cannot clear read tracking file");
        }
    }

    /// Note a read of `path`. Failures are logged, never returned.
    pub async fn track(&self, path: &str) {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            self.seen.clear();
        }
        if !self.seen.insert(path.to_string()) {
            return;
        }
        let line = format!("{}\0", path.trim_start_matches('/'));
        if let Err(e) = self.append(line.as_bytes()).await {
            tracing::warn!(target: "sftp-pipe::tracking", path = %self.path.display(), error = %e, "cannot append to read tracking file");
            self.seen.remove(path);
        }
    }

    async fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}
