//! Confines a session to one directory.
//!
//! Client paths are virtual: `/` (and `~`) is the served root, and `..`
//! never climbs above it. Resolution is lexical, so a symlink inside the
//! root that points outside is still followed by the backend.

use super::handler::{BackendHandle, Filesystem};
use crate::protocol::{FileAttrs, Item, OpenMode, VfsStats};
use std::io;
use std::path::{Path, PathBuf};

/// Per-session restrictions applied on top of path confinement.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Reject every mutating operation with EROFS.
    pub read_only: bool,
    /// Strip owner ids from returned attributes.
    pub hide_uid_gid: bool,
}

impl SessionOptions {
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn hide_uid_gid(mut self, hide: bool) -> Self {
        self.hide_uid_gid = hide;
        self
    }
}

/// Turn a client path into an absolute virtual path with no `.` or `..`.
///
/// Relative paths are taken from the root. A leading `~` or `~/` denotes
/// the root too.
pub fn normalize(path: &str) -> String {
    let rest = path
        .strip_prefix('~')
        .filter(|r| r.is_empty() || r.starts_with('/'))
        .unwrap_or(path);
    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

/// [`Filesystem`] wrapper that maps virtual paths under a root directory.
pub struct SafeFilesystem<F> {
    inner: F,
    root: PathBuf,
    options: SessionOptions,
}

impl<F: Filesystem> SafeFilesystem<F> {
    /// Wrap `inner`, serving `root`. Fails unless `root` is an existing
    /// directory.
    pub fn new(inner: F, root: impl AsRef<Path>, options: SessionOptions) -> io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        Ok(Self {
            inner,
            root,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Backend path for a client path.
    pub fn real_path(&self, path: &str) -> String {
        let virtual_path = normalize(path);
        self.root
            .join(&virtual_path[1..])
            .to_string_lossy()
            .into_owned()
    }

    /// Client path for a backend path, if it lies under the root.
    pub fn virtual_path(&self, real: &str) -> Option<String> {
        let rel = Path::new(real).strip_prefix(&self.root).ok()?;
        Some(normalize(&rel.to_string_lossy()))
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.options.read_only {
            Err(io::Error::from_raw_os_error(libc::EROFS))
        } else {
            Ok(())
        }
    }

    fn scrub(&self, mut attrs: FileAttrs) -> FileAttrs {
        if self.options.hide_uid_gid {
            attrs.owner = None;
        }
        attrs
    }
}

#[async_trait::async_trait]
impl<F: Filesystem> Filesystem for SafeFilesystem<F> {
    async fn open(&self, path: &str, mode: OpenMode, attrs: &FileAttrs) -> io::Result<BackendHandle> {
        if mode.is_writable() {
            self.check_writable()?;
        }
        self.inner.open(&self.real_path(path), mode, attrs).await
    }

    async fn close(&self, handle: BackendHandle) -> io::Result<()> {
        self.inner.close(handle).await
    }

    async fn read(&self, handle: BackendHandle, offset: u64, len: u32) -> io::Result<Vec<u8>> {
        self.inner.read(handle, offset, len).await
    }

    async fn write(&self, handle: BackendHandle, offset: u64, data: Vec<u8>) -> io::Result<()> {
        self.check_writable()?;
        self.inner.write(handle, offset, data).await
    }

    async fn lstat(&self, path: &str) -> io::Result<FileAttrs> {
        let attrs = self.inner.lstat(&self.real_path(path)).await?;
        Ok(self.scrub(attrs))
    }

    async fn stat(&self, path: &str) -> io::Result<FileAttrs> {
        let attrs = self.inner.stat(&self.real_path(path)).await?;
        Ok(self.scrub(attrs))
    }

    async fn fstat(&self, handle: BackendHandle) -> io::Result<FileAttrs> {
        let attrs = self.inner.fstat(handle).await?;
        Ok(self.scrub(attrs))
    }

    async fn setstat(&self, path: &str, attrs: &FileAttrs) -> io::Result<()> {
        self.check_writable()?;
        self.inner.setstat(&self.real_path(path), attrs).await
    }

    async fn fsetstat(&self, handle: BackendHandle, attrs: &FileAttrs) -> io::Result<()> {
        self.check_writable()?;
        self.inner.fsetstat(handle, attrs).await
    }

    async fn opendir(&self, path: &str) -> io::Result<BackendHandle> {
        self.inner.opendir(&self.real_path(path)).await
    }

    async fn readdir(&self, handle: BackendHandle) -> io::Result<Vec<Item>> {
        let items = self.inner.readdir(handle).await?;
        if !self.options.hide_uid_gid {
            return Ok(items);
        }
        Ok(items
            .into_iter()
            .map(|item| Item::new(item.filename, self.scrub(item.attrs)))
            .collect())
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        self.inner.unlink(&self.real_path(path)).await
    }

    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> io::Result<()> {
        self.check_writable()?;
        self.inner.mkdir(&self.real_path(path), attrs).await
    }

    async fn rmdir(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        self.inner.rmdir(&self.real_path(path)).await
    }

    async fn realpath(&self, path: &str) -> io::Result<String> {
        Ok(normalize(path))
    }

    async fn rename(&self, old_path: &str, new_path: &str, overwrite: bool) -> io::Result<()> {
        self.check_writable()?;
        self.inner
            .rename(&self.real_path(old_path), &self.real_path(new_path), overwrite)
            .await
    }

    async fn readlink(&self, path: &str) -> io::Result<String> {
        let target = self.inner.readlink(&self.real_path(path)).await?;
        if target.starts_with('/') {
            if let Some(virtual_target) = self.virtual_path(&target) {
                return Ok(virtual_target);
            }
        }
        Ok(target)
    }

    async fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        self.check_writable()?;
        let target = if target.starts_with('/') {
            self.real_path(target)
        } else {
            target.to_string()
        };
        self.inner.symlink(&target, &self.real_path(link_path)).await
    }

    async fn link(&self, old_path: &str, new_path: &str) -> io::Result<()> {
        self.check_writable()?;
        self.inner
            .link(&self.real_path(old_path), &self.real_path(new_path))
            .await
    }

    async fn statvfs(&self, path: &str) -> io::Result<VfsStats> {
        self.inner.statvfs(&self.real_path(path)).await
    }

    async fn fcopy(
        &self,
        from: BackendHandle,
        from_offset: u64,
        len: u64,
        to: BackendHandle,
        to_offset: u64,
    ) -> io::Result<()> {
        self.check_writable()?;
        self.inner.fcopy(from, from_offset, len, to, to_offset).await
    }

    async fn fhash(
        &self,
        handle: BackendHandle,
        algorithms: &str,
        offset: u64,
        len: u64,
        block_size: u32,
    ) -> io::Result<(String, Vec<u8>)> {
        self.inner
            .fhash(handle, algorithms, offset, len, block_size)
            .await
    }
}
