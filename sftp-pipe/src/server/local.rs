//! Filesystem backed by the local disk.
//!
//! Every syscall runs on tokio's blocking pool. Paths are taken as given;
//! wrap in [`SafeFilesystem`](super::SafeFilesystem) to confine a session
//! to a directory.

use super::handler::{BackendHandle, Filesystem};
use crate::protocol::{FileAttrs, Item, OpenMode, VfsStats};

use dashmap::DashMap;
use std::fs::{self, File, FileTimes, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mode for files created without explicit permissions.
const DEFAULT_FILE_MODE: u32 = 0o666;

/// Mode for directories created without explicit permissions.
const DEFAULT_DIR_MODE: u32 = 0o777;

#[derive(Clone)]
enum OpenEntry {
    File(Arc<File>),
    Dir { path: PathBuf, listed: bool },
}

/// Local-disk implementation of [`Filesystem`].
#[derive(Default)]
pub struct LocalFilesystem {
    open: DashMap<BackendHandle, OpenEntry>,
    next_handle: AtomicU64,
}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files and directories currently open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    fn insert(&self, entry: OpenEntry) -> BackendHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.open.insert(handle, entry);
        handle
    }

    fn entry(&self, handle: BackendHandle) -> io::Result<OpenEntry> {
        self.open
            .get(&handle)
            .map(|e| e.value().clone())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn file(&self, handle: BackendHandle) -> io::Result<Arc<File>> {
        match self.entry(handle)? {
            OpenEntry::File(file) => Ok(file),
            OpenEntry::Dir { .. } => Err(io::Error::from_raw_os_error(libc::EISDIR)),
        }
    }
}

/// Run a blocking filesystem call off the async runtime.
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn clamp_time(secs: i64) -> u32 {
    secs.clamp(0, i64::from(u32::MAX)) as u32
}

fn epoch_time(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::from(secs))
}

/// Protocol attributes for a stat result, including the `blocks` extension.
pub fn metadata_to_attrs(meta: &fs::Metadata) -> FileAttrs {
    let mut attrs = FileAttrs::new()
        .with_size(meta.size())
        .with_owner(meta.uid(), meta.gid())
        .with_permissions(meta.mode())
        .with_times(clamp_time(meta.atime()), clamp_time(meta.mtime()));
    attrs.set_blocks(meta.blocks());
    attrs
}

fn open_options(mode: OpenMode) -> OpenOptions {
    let mut options = OpenOptions::new();
    match mode {
        OpenMode::Read => options.read(true),
        OpenMode::ReadWrite => options.read(true).write(true),
        OpenMode::WriteTruncate => options.write(true).create(true).truncate(true),
        OpenMode::WriteCreateNew => options.write(true).create_new(true),
        OpenMode::ReadWriteTruncate => options.read(true).write(true).create(true).truncate(true),
        OpenMode::ReadWriteCreateNew => options.read(true).write(true).create_new(true),
        OpenMode::Append => options.append(true).create(true),
        OpenMode::AppendCreateNew => options.append(true).create_new(true),
        OpenMode::ReadAppend => options.read(true).append(true).create(true),
        OpenMode::ReadAppendCreateNew => options.read(true).append(true).create_new(true),
    };
    options
}

fn set_path_attrs(path: &Path, attrs: &FileAttrs) -> io::Result<()> {
    if let Some(size) = attrs.size {
        OpenOptions::new().write(true).open(path)?.set_len(size)?;
    }
    if let Some(mode) = attrs.permissions {
        fs::set_permissions(path, Permissions::from_mode(mode & 0o7777))?;
    }
    if let Some((uid, gid)) = attrs.owner {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))?;
    }
    if let Some((atime, mtime)) = attrs.times {
        use nix::sys::time::TimeVal;
        nix::sys::stat::utimes(
            path,
            &TimeVal::new(i64::from(atime) as libc::time_t, 0),
            &TimeVal::new(i64::from(mtime) as libc::time_t, 0),
        )?;
    }
    Ok(())
}

fn set_file_attrs(file: &File, attrs: &FileAttrs) -> io::Result<()> {
    if let Some(size) = attrs.size {
        file.set_len(size)?;
    }
    if let Some(mode) = attrs.permissions {
        file.set_permissions(Permissions::from_mode(mode & 0o7777))?;
    }
    if let Some((uid, gid)) = attrs.owner {
        std::os::unix::fs::fchown(file, Some(uid), Some(gid))?;
    }
    if let Some((atime, mtime)) = attrs.times {
        let times = FileTimes::new()
            .set_accessed(epoch_time(atime))
            .set_modified(epoch_time(mtime));
        file.set_times(times)?;
    }
    Ok(())
}

fn read_at(file: &File, offset: u64, len: u32) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn list_dir(path: &Path) -> io::Result<Vec<Item>> {
    let mut items = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        // Entries removed between listing and stat are skipped.
        let Ok(meta) = fs::symlink_metadata(entry.path()) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        items.push(Item::new(name, metadata_to_attrs(&meta)));
    }
    Ok(items)
}

#[async_trait::async_trait]
impl Filesystem for LocalFilesystem {
    async fn open(&self, path: &str, mode: OpenMode, attrs: &FileAttrs) -> io::Result<BackendHandle> {
        let path = PathBuf::from(path);
        let perm = attrs.permissions.map(|m| m & 0o7777).unwrap_or(DEFAULT_FILE_MODE);
        let file = blocking(move || open_options(mode).mode(perm).open(&path)).await?;
        let handle = self.insert(OpenEntry::File(Arc::new(file)));
        tracing::debug!(target: "local_fs", handle, mode = mode.as_str(), "opened");
        Ok(handle)
    }

    async fn close(&self, handle: BackendHandle) -> io::Result<()> {
        match self.open.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    async fn read(&self, handle: BackendHandle, offset: u64, len: u32) -> io::Result<Vec<u8>> {
        let file = self.file(handle)?;
        blocking(move || read_at(&file, offset, len)).await
    }

    async fn write(&self, handle: BackendHandle, offset: u64, data: Vec<u8>) -> io::Result<()> {
        let file = self.file(handle)?;
        blocking(move || file.write_all_at(&data, offset)).await
    }

    async fn lstat(&self, path: &str) -> io::Result<FileAttrs> {
        let path = PathBuf::from(path);
        blocking(move || fs::symlink_metadata(path).map(|m| metadata_to_attrs(&m))).await
    }

    async fn stat(&self, path: &str) -> io::Result<FileAttrs> {
        let path = PathBuf::from(path);
        blocking(move || fs::metadata(path).map(|m| metadata_to_attrs(&m))).await
    }

    async fn fstat(&self, handle: BackendHandle) -> io::Result<FileAttrs> {
        match self.entry(handle)? {
            OpenEntry::File(file) => blocking(move || file.metadata().map(|m| metadata_to_attrs(&m))).await,
            OpenEntry::Dir { path, .. } => {
                blocking(move || fs::metadata(path).map(|m| metadata_to_attrs(&m))).await
            }
        }
    }

    async fn setstat(&self, path: &str, attrs: &FileAttrs) -> io::Result<()> {
        let path = PathBuf::from(path);
        let attrs = attrs.clone();
        blocking(move || set_path_attrs(&path, &attrs)).await
    }

    async fn fsetstat(&self, handle: BackendHandle, attrs: &FileAttrs) -> io::Result<()> {
        let attrs = attrs.clone();
        match self.entry(handle)? {
            OpenEntry::File(file) => blocking(move || set_file_attrs(&file, &attrs)).await,
            OpenEntry::Dir { path, .. } => blocking(move || set_path_attrs(&path, &attrs)).await,
        }
    }

    async fn opendir(&self, path: &str) -> io::Result<BackendHandle> {
        let path = PathBuf::from(path);
        let checked = path.clone();
        blocking(move || {
            if fs::metadata(&checked)?.is_dir() {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(libc::ENOTDIR))
            }
        })
        .await?;
        Ok(self.insert(OpenEntry::Dir { path, listed: false }))
    }

    async fn readdir(&self, handle: BackendHandle) -> io::Result<Vec<Item>> {
        let path = match self.entry(handle)? {
            OpenEntry::Dir { listed: true, .. } => return Ok(Vec::new()),
            OpenEntry::Dir { path, .. } => path,
            OpenEntry::File(_) => return Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
        };
        let items = blocking(move || list_dir(&path)).await?;
        if let Some(mut entry) = self.open.get_mut(&handle) {
            if let OpenEntry::Dir { listed, .. } = entry.value_mut() {
                *listed = true;
            }
        }
        tracing::debug!(target: "local_fs", handle, count = items.len(), "listed directory");
        Ok(items)
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        let path = PathBuf::from(path);
        blocking(move || fs::remove_file(path)).await
    }

    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> io::Result<()> {
        let path = PathBuf::from(path);
        let mode = attrs.permissions.map(|m| m & 0o7777).unwrap_or(DEFAULT_DIR_MODE);
        blocking(move || fs::DirBuilder::new().mode(mode).create(path)).await
    }

    async fn rmdir(&self, path: &str) -> io::Result<()> {
        let path = PathBuf::from(path);
        blocking(move || fs::remove_dir(path)).await
    }

    async fn realpath(&self, path: &str) -> io::Result<String> {
        let path = PathBuf::from(path);
        blocking(move || fs::canonicalize(path).map(|p| p.to_string_lossy().into_owned())).await
    }

    async fn rename(&self, old_path: &str, new_path: &str, overwrite: bool) -> io::Result<()> {
        let old_path = PathBuf::from(old_path);
        let new_path = PathBuf::from(new_path);
        blocking(move || {
            if !overwrite && fs::symlink_metadata(&new_path).is_ok() {
                return Err(io::Error::from_raw_os_error(libc::EEXIST));
            }
            fs::rename(old_path, new_path)
        })
        .await
    }

    async fn readlink(&self, path: &str) -> io::Result<String> {
        let path = PathBuf::from(path);
        blocking(move || fs::read_link(path).map(|p| p.to_string_lossy().into_owned())).await
    }

    async fn symlink(&self, target: &str, link_path: &str) -> io::Result<()> {
        let target = PathBuf::from(target);
        let link_path = PathBuf::from(link_path);
        blocking(move || std::os::unix::fs::symlink(target, link_path)).await
    }

    async fn link(&self, old_path: &str, new_path: &str) -> io::Result<()> {
        let old_path = PathBuf::from(old_path);
        let new_path = PathBuf::from(new_path);
        blocking(move || fs::hard_link(old_path, new_path)).await
    }

    async fn statvfs(&self, path: &str) -> io::Result<VfsStats> {
        let path = PathBuf::from(path);
        blocking(move || {
            let st = nix::sys::statvfs::statvfs(path.as_path())?;
            Ok(VfsStats {
                bsize: st.block_size() as u64,
                frsize: st.fragment_size() as u64,
                blocks: st.blocks() as u64,
                bfree: st.blocks_free() as u64,
                bavail: st.blocks_available() as u64,
                files: st.files() as u64,
                ffree: st.files_free() as u64,
                favail: st.files_available() as u64,
                fsid: st.filesystem_id() as u64,
                flag: st.flags().bits() as u64,
                namemax: st.name_max() as u64,
            })
        })
        .await
    }
}
