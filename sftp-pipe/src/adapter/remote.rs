//! POSIX-style filesystem calls over a reconnecting client.

use super::backoff::Backoff;
use super::cache::PathCaches;
use super::metadata::{MetadataFile, METADATA_RELOAD_INTERVAL};
use super::tracking::ReadTracking;
use super::AdapterConfig;
use crate::client::{Handle, SftpClient};
use crate::protocol::{FileAttrs, OpenFlags, VfsStats};
use crate::transport::Connector;

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Native error number, as handed to the OS integration layer.
pub type Errno = i32;

pub type FsResult<T> = Result<T, Errno>;

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Init,
    Connecting,
    Ready,
    /// Shut down explicitly; never reconnects.
    Closed,
}

enum Connection {
    Init,
    Connecting,
    Ready(Arc<SftpClient>),
    Closed,
}

impl Connection {
    fn state(&self) -> AdapterState {
        match self {
            Connection::Init => AdapterState::Init,
            Connection::Connecting => AdapterState::Connecting,
            Connection::Ready(_) => AdapterState::Ready,
            Connection::Closed => AdapterState::Closed,
        }
    }
}

/// File attributes in the shape an OS layer expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    /// Not carried by the protocol; mirrors `mtime`.
    pub ctime: u32,
    pub blocks: u64,
}

impl From<&FileAttrs> for Stat {
    fn from(attrs: &FileAttrs) -> Self {
        let (uid, gid) = attrs.owner.unwrap_or((0, 0));
        let (atime, mtime) = attrs.times.unwrap_or((0, 0));
        Self {
            mode: attrs.permissions.unwrap_or(0),
            size: attrs.size.unwrap_or(0),
            uid,
            gid,
            atime,
            mtime,
            ctime: mtime,
            blocks: attrs.blocks().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingWrite {
    position: u64,
    data: Vec<u8>,
}

/// Merge each buffer with its successors while they are contiguous.
fn coalesce(writes: Vec<PendingWrite>) -> Vec<PendingWrite> {
    let mut merged: Vec<PendingWrite> = Vec::with_capacity(writes.len());
    for write in writes {
        match merged.last_mut() {
            Some(last) if last.position + last.data.len() as u64 == write.position => {
                last.data.extend_from_slice(&write.data);
            }
            _ => merged.push(write),
        }
    }
    merged
}

pub(crate) fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

struct Inner {
    connector: Box<dyn Connector>,
    config: AdapterConfig,
    connection: Mutex<Connection>,
    backoff: Mutex<Backoff>,
    caches: PathCaches,
    metadata: Option<Arc<MetadataFile>>,
    tracking: Option<ReadTracking>,
    /// Set once the metadata refresher and read tracking have started.
    started: AtomicBool,
    refresher: Mutex<Option<JoinHandle<()>>>,
    files: DashMap<u64, Handle>,
    writes: DashMap<u64, Vec<PendingWrite>>,
}

impl Inner {
    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresher(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.refresher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client(&self) -> FsResult<Arc<SftpClient>> {
        match &*self.connection() {
            Connection::Ready(client) => Ok(Arc::clone(client)),
            _ => Err(libc::ENOTCONN),
        }
    }

    /// One connection attempt. Only valid from `Init`.
    async fn connect_to_server(self: &Arc<Self>) -> FsResult<()> {
        {
            let mut conn = self.connection();
            if !matches!(*conn, Connection::Init) {
                return Err(libc::EALREADY);
            }
            *conn = Connection::Connecting;
        }
        tracing::debug!(target: "sftp-pipe::adapter", parent: &self.config.span, "connecting");

        let attempt = self.open_client().await;

        let client = match attempt {
            Ok(client) => Arc::new(client),
            Err(errno) => {
                let mut conn = self.connection();
                if matches!(*conn, Connection::Connecting) {
                    *conn = Connection::Init;
                }
                return Err(errno);
            }
        };

        let installed = {
            let mut conn = self.connection();
            if matches!(*conn, Connection::Connecting) {
                *conn = Connection::Ready(Arc::clone(&client));
                true
            } else {
                false
            }
        };
        if !installed {
            // Shut down while connecting.
            client.shutdown().await;
            return Err(libc::ENOTCONN);
        }

        self.backoff().reset();
        tracing::info!(target: "sftp-pipe::adapter", parent: &self.config.span, "connected");

        let inner = Arc::clone(self);
        tokio::spawn(
            async move {
                client.closed().await;
                inner.connection_lost(&client);
            }
            .instrument(self.config.span.clone()),
        );
        Ok(())
    }

    async fn open_client(&self) -> FsResult<SftpClient> {
        let channel = self.connector.connect().await.map_err(|e| {
            tracing::debug!(target: "sftp-pipe::adapter", parent: &self.config.span, error = %e, "connect failed");
            libc::ENOTCONN
        })?;
        SftpClient::connect(channel, self.config.client.clone())
            .await
            .map_err(|e| e.errno())
    }

    fn connection_lost(self: &Arc<Self>, client: &Arc<SftpClient>) {
        {
            let mut conn = self.connection();
            let current = matches!(&*conn, Connection::Ready(c) if Arc::ptr_eq(c, client));
            if !current {
                return;
            }
            *conn = Connection::Init;
        }
        let dropped_writes = self.writes.len();
        self.files.clear();
        self.writes.clear();
        tracing::warn!(target: "sftp-pipe::adapter", parent: &self.config.span, dropped_writes, "connection closed");

        if self.config.reconnect {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        tokio::spawn(Arc::clone(self).reconnect_loop().instrument(self.config.span.clone()));
    }

    /// Load the metadata file, keep reloading it in the background, and
    /// clear the read tracking file. Runs once.
    async fn start_local_files(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tracking) = &self.tracking {
            tracking.reset().await;
        }
        let Some(metadata) = &self.metadata else {
            return;
        };
        metadata.reload().await;
        let weak = Arc::downgrade(metadata);
        let task = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(METADATA_RELOAD_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let Some(metadata) = weak.upgrade() else {
                        return;
                    };
                    metadata.reload().await;
                }
            }
            .instrument(self.config.span.clone()),
        );
        *self.refresher() = Some(task);
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            let delay = self.backoff().next_delay();
            tokio::time::sleep(delay).await;
            if matches!(*self.connection(), Connection::Closed) {
                return;
            }
            match self.connect_to_server().await {
                Ok(()) => return,
                // Another attempt owns the connection now.
                Err(libc::EALREADY) => return,
                Err(errno) => {
                    tracing::debug!(target: "sftp-pipe::adapter", errno, ?delay, "reconnect failed");
                }
            }
        }
    }
}

/// Remote filesystem with attribute, listing and symlink caches, write
/// coalescing, and automatic reconnection.
///
/// Every call returns data or an errno. While not connected, calls fail
/// with ENOTCONN without touching the network or the caches.
#[derive(Clone)]
pub struct RemoteFs {
    inner: Arc<Inner>,
}

impl RemoteFs {
    pub fn new(connector: impl Connector + 'static, config: AdapterConfig) -> Self {
        let backoff = config.backoff();
        let caches = PathCaches::new(&config);
        let metadata = config
            .metadata_file
            .as_ref()
            .map(|path| Arc::new(MetadataFile::new(path)));
        let tracking = config.read_tracking_file.as_ref().map(ReadTracking::new);
        Self {
            inner: Arc::new(Inner {
                connector: Box::new(connector),
                config,
                connection: Mutex::new(Connection::Init),
                backoff: Mutex::new(backoff),
                caches,
                metadata,
                tracking,
                started: AtomicBool::new(false),
                refresher: Mutex::new(None),
                files: DashMap::new(),
                writes: DashMap::new(),
            }),
        }
    }

    fn span(&self) -> &tracing::Span {
        &self.inner.config.span
    }

    pub fn state(&self) -> AdapterState {
        self.inner.connection().state()
    }

    /// Connect now. On failure, retries continue in the background when
    /// reconnection is enabled.
    ///
    /// The first call also loads the metadata file and clears the read
    /// tracking file, when configured.
    pub async fn connect(&self) -> FsResult<()> {
        if self.state() != AdapterState::Closed {
            self.inner.start_local_files().await;
        }
        match self.inner.connect_to_server().await {
            Ok(()) => Ok(()),
            Err(errno) => {
                if self.inner.config.reconnect && errno != libc::EALREADY {
                    self.inner.spawn_reconnect();
                }
                Err(errno)
            }
        }
    }

    /// Close the connection for good.
    pub async fn shutdown(&self) {
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), "shutting down");
        let client = {
            let mut conn = self.inner.connection();
            match std::mem::replace(&mut *conn, Connection::Closed) {
                Connection::Ready(client) => Some(client),
                _ => None,
            }
        };
        self.inner.files.clear();
        self.inner.writes.clear();
        if let Some(task) = self.inner.refresher().take() {
            task.abort();
        }
        if let Some(client) = client {
            client.shutdown().await;
        }
    }

    /// Drop cached data for `path` and its parent's listing.
    pub async fn clear_cache(&self, path: &str) {
        self.inner.caches.invalidate(path).await;
        if let Some(metadata) = &self.inner.metadata {
            metadata.mark_dirty(path);
            metadata.mark_dirty(parent(path));
        }
    }

    fn handle(&self, fd: u64) -> FsResult<Handle> {
        self.inner
            .files
            .get(&fd)
            .map(|h| h.value().clone())
            .ok_or(libc::EBADF)
    }

    /// Answer from the attribute cache, then from the metadata snapshot.
    async fn known_attr(&self, path: &str) -> Option<FsResult<Stat>> {
        if let Some(cached) = self.inner.caches.attr(path).await {
            return Some(cached);
        }
        let result = self.inner.metadata.as_ref()?.getattr(path)?;
        self.inner.caches.put_attr(path, &result).await;
        Some(result)
    }

    pub async fn getattr(&self, path: &str) -> FsResult<Stat> {
        let client = self.inner.client()?;
        if let Some(known) = self.known_attr(path).await {
            return known;
        }
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, "getattr");
        let result = client
            .lstat(path)
            .await
            .map(|attrs| Stat::from(&attrs))
            .map_err(|e| e.errno());
        self.inner.caches.put_attr(path, &result).await;
        result
    }

    pub async fn fgetattr(&self, path: &str, fd: u64) -> FsResult<Stat> {
        let client = self.inner.client()?;
        if let Some(known) = self.known_attr(path).await {
            return known;
        }
        let handle = self.handle(fd)?;
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, fd, "fgetattr");
        let result = client
            .fstat(&handle)
            .await
            .map(|attrs| Stat::from(&attrs))
            .map_err(|e| e.errno());
        self.inner.caches.put_attr(path, &result).await;
        result
    }

    pub async fn statfs(&self, path: &str) -> FsResult<VfsStats> {
        let client = self.inner.client()?;
        client.statvfs(path).await.map_err(|e| e.errno())
    }

    /// Entry names of a directory. Also seeds the attribute cache for
    /// every child.
    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let client = self.inner.client()?;
        if let Some(names) = self.inner.caches.listing(path).await {
            return Ok(names);
        }
        let entries = match self.inner.metadata.as_ref().and_then(|m| m.readdir(path)) {
            Some(entries) => entries,
            None => {
                tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, "readdir");
                let items = client.read_dir(path).await.map_err(|e| e.errno())?;
                items
                    .into_iter()
                    .map(|item| {
                        let stat = Stat::from(&item.attrs);
                        (item.filename, stat)
                    })
                    .collect()
            }
        };
        let mut names = Vec::with_capacity(entries.len());
        for (name, stat) in entries {
            self.inner.caches.put_attr(&join(path, &name), &Ok(stat)).await;
            names.push(name);
        }
        self.inner.caches.put_listing(path, &names).await;
        Ok(names)
    }

    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        let client = self.inner.client()?;
        if let Some(target) = self.inner.caches.link(path).await {
            return Ok(target);
        }
        let target = client.readlink(path).await.map_err(|e| e.errno())?;
        self.inner.caches.put_link(path, &target).await;
        Ok(target)
    }

    /// Open with POSIX `O_*` flags. Returns a descriptor for later calls.
    pub async fn open(&self, path: &str, flags: i32) -> FsResult<u64> {
        let client = self.inner.client()?;
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, flags, "open");
        self.clear_cache(path).await;
        let handle = client
            .open(path, OpenFlags::from_posix(flags), None)
            .await
            .map_err(|e| e.errno())?;
        Ok(self.register(handle))
    }

    /// Create or truncate `path` for writing.
    pub async fn create(&self, path: &str, mode: u32) -> FsResult<u64> {
        let client = self.inner.client()?;
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, mode, "create");
        self.clear_cache(path).await;
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC;
        let attrs = FileAttrs::new().with_permissions(mode & 0o7777);
        let handle = client
            .open(path, flags, Some(attrs))
            .await
            .map_err(|e| e.errno())?;
        Ok(self.register(handle))
    }

    fn register(&self, handle: Handle) -> u64 {
        let fd = handle.to_file_descriptor();
        self.inner.files.insert(fd, handle);
        fd
    }

    /// Read up to `len` bytes at `position`. Buffered writes on `fd` are
    /// flushed first.
    pub async fn read(&self, path: &str, fd: u64, len: usize, position: u64) -> FsResult<Vec<u8>> {
        let client = self.inner.client()?;
        let handle = self.handle(fd)?;
        if self.inner.writes.contains_key(&fd) {
            self.flush(path, fd).await?;
        }
        let data = client
            .read(&handle, position, len)
            .await
            .map_err(|e| e.errno())?;
        if let Some(tracking) = &self.inner.tracking {
            tracking.track(path).await;
        }
        Ok(data)
    }

    /// Buffer a write. Returns the number of bytes accepted.
    pub async fn write(&self, path: &str, fd: u64, data: &[u8], position: u64) -> FsResult<usize> {
        self.inner.client()?;
        self.handle(fd)?;
        self.clear_cache(path).await;
        let pending = {
            let mut buffers = self.inner.writes.entry(fd).or_default();
            buffers.push(PendingWrite {
                position,
                data: data.to_vec(),
            });
            buffers.len()
        };
        if pending > self.inner.config.write_coalesce_limit {
            self.flush(path, fd).await?;
        }
        Ok(data.len())
    }

    /// Send buffered writes for `fd`, merging contiguous ones.
    pub async fn flush(&self, path: &str, fd: u64) -> FsResult<()> {
        let client = self.inner.client()?;
        let Some((_, buffers)) = self.inner.writes.remove(&fd) else {
            return Ok(());
        };
        let handle = self.handle(fd)?;
        self.clear_cache(path).await;
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, fd, buffers = buffers.len(), "flush");

        for write in coalesce(buffers) {
            if let Err(e) = client.write(&handle, write.position, &write.data).await {
                let errno = e.errno();
                if errno == libc::ENOENT {
                    tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, "flush: file gone, ignoring");
                    return Ok(());
                }
                return Err(errno);
            }
        }
        Ok(())
    }

    pub async fn fsync(&self, path: &str, _datasync: bool, fd: u64) -> FsResult<()> {
        self.flush(path, fd).await
    }

    /// Flush and close `fd`.
    pub async fn release(&self, path: &str, fd: u64) -> FsResult<()> {
        let client = self.inner.client()?;
        let flushed = self.flush(path, fd).await;
        let Some((_, handle)) = self.inner.files.remove(&fd) else {
            return Err(libc::EBADF);
        };
        let closed = client.close(&handle).await.map_err(|e| e.errno());
        flushed.and(closed)
    }

    /// Rename, replacing `dest` if it exists.
    pub async fn rename(&self, src: &str, dest: &str) -> FsResult<()> {
        let client = self.inner.client()?;
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), src, dest, "rename");
        self.clear_cache(src).await;
        self.clear_cache(dest).await;
        client.rename(src, dest, true).await.map_err(|e| e.errno())
    }

    pub async fn link(&self, src: &str, dest: &str) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(src).await;
        self.clear_cache(dest).await;
        client.link(src, dest).await.map_err(|e| e.errno())
    }

    /// Create `link_path` pointing at `target`.
    pub async fn symlink(&self, target: &str, link_path: &str) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(target).await;
        self.clear_cache(link_path).await;
        client.symlink(target, link_path).await.map_err(|e| e.errno())
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        let attrs = FileAttrs::new().with_permissions(mode & 0o7777);
        client.mkdir(path, Some(attrs)).await.map_err(|e| e.errno())
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        client.rmdir(path).await.map_err(|e| e.errno())
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        client.unlink(path).await.map_err(|e| e.errno())
    }

    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        client
            .setstat(path, FileAttrs::new().with_size(size))
            .await
            .map_err(|e| e.errno())
    }

    /// Truncate through an open descriptor, after its buffered writes land.
    pub async fn ftruncate(&self, path: &str, fd: u64, size: u64) -> FsResult<()> {
        let client = self.inner.client()?;
        let handle = self.handle(fd)?;
        self.flush(path, fd).await?;
        self.clear_cache(path).await;
        client
            .fsetstat(&handle, FileAttrs::new().with_size(size))
            .await
            .map_err(|e| e.errno())
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        client
            .setstat(path, FileAttrs::new().with_permissions(mode & 0o7777))
            .await
            .map_err(|e| e.errno())
    }

    /// Ownership is not propagated; accepted and ignored.
    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        tracing::debug!(target: "sftp-pipe::adapter", parent: self.span(), path, uid, gid, "chown ignored");
        Ok(())
    }

    pub async fn utimens(&self, path: &str, atime: u32, mtime: u32) -> FsResult<()> {
        let client = self.inner.client()?;
        self.clear_cache(path).await;
        client
            .setstat(path, FileAttrs::new().with_times(atime, mtime))
            .await
            .map_err(|e| e.errno())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Channel, TransportError};

    struct Refusing;

    #[async_trait::async_trait]
    impl Connector for Refusing {
        async fn connect(&self) -> Result<Channel, TransportError> {
            Err(TransportError::ConnectionRefused)
        }
    }

    fn write(position: u64, data: &[u8]) -> PendingWrite {
        PendingWrite {
            position,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_coalesce_merges_adjacent() {
        let merged = coalesce(vec![
            write(0, b"ab"),
            write(2, b"cd"),
            write(10, b"x"),
            write(11, b"y"),
            write(0, b"z"),
        ]);
        assert_eq!(merged, vec![write(0, b"abcd"), write(10, b"xy"), write(0, b"z")]);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent("/a/b.txt"), "/a");
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(parent("a.txt"), ".");
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/d", "x"), "/d/x");
    }

    #[test]
    fn test_stat_from_attrs() {
        let mut attrs = FileAttrs::new()
            .with_size(5)
            .with_permissions(libc::S_IFREG as u32 | 0o644)
            .with_times(10, 20);
        attrs.set_blocks(8);
        let stat = Stat::from(&attrs);
        assert_eq!(stat.size, 5);
        assert_eq!(stat.ctime, 20);
        assert_eq!(stat.blocks, 8);
    }

    #[tokio::test]
    async fn test_not_ready_fails_fast() {
        let fs = RemoteFs::new(Refusing, AdapterConfig::default().reconnect(false));
        assert_eq!(fs.state(), AdapterState::Init);
        assert_eq!(fs.getattr("/a").await, Err(libc::ENOTCONN));
        assert_eq!(fs.open("/a", libc::O_RDONLY).await, Err(libc::ENOTCONN));

        assert_eq!(fs.connect().await, Err(libc::ENOTCONN));
        assert_eq!(fs.state(), AdapterState::Init);

        fs.shutdown().await;
        assert_eq!(fs.state(), AdapterState::Closed);
        assert_eq!(fs.connect().await, Err(libc::EALREADY));
    }

    #[tokio::test]
    async fn test_chown_is_accepted() {
        let fs = RemoteFs::new(Refusing, AdapterConfig::default().reconnect(false));
        assert_eq!(fs.chown("/a", 1, 1).await, Ok(()));
    }
}
