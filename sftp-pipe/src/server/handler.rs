//! Filesystem capability consumed by the session dispatcher.

use crate::protocol::{FileAttrs, Item, OpenMode, VfsStats, MAX_READ_BLOCK_LENGTH};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::io;

/// Backend-assigned handle for an open file or directory.
///
/// Distinct from the protocol handles a session hands to clients; the
/// session maps one to the other.
pub type BackendHandle = u64;

/// Hash algorithms `fhash` understands, in preference order.
pub const HASH_ALGORITHMS: [&str; 4] = ["sha256", "sha512", "sha384", "sha224"];

/// Backing filesystem for a session.
///
/// Paths are passed through as the dispatcher received them (after any
/// confinement wrapper has rewritten them). Errors are native I/O errors;
/// the dispatcher maps their errno to a protocol status.
///
/// Operations without a natural default return ENOSYS.
#[async_trait::async_trait]
pub trait Filesystem: Send + Sync {
    async fn open(&self, path: &str, mode: OpenMode, attrs: &FileAttrs) -> io::Result<BackendHandle>;

    async fn close(&self, handle: BackendHandle) -> io::Result<()>;

    /// Read up to `len` bytes. An empty result means end of file.
    async fn read(&self, handle: BackendHandle, offset: u64, len: u32) -> io::Result<Vec<u8>>;

    async fn write(&self, handle: BackendHandle, offset: u64, data: Vec<u8>) -> io::Result<()>;

    async fn lstat(&self, path: &str) -> io::Result<FileAttrs>;

    async fn stat(&self, path: &str) -> io::Result<FileAttrs>;

    async fn fstat(&self, handle: BackendHandle) -> io::Result<FileAttrs>;

    async fn setstat(&self, path: &str, attrs: &FileAttrs) -> io::Result<()>;

    async fn fsetstat(&self, handle: BackendHandle, attrs: &FileAttrs) -> io::Result<()>;

    async fn opendir(&self, path: &str) -> io::Result<BackendHandle>;

    /// Next batch of entries. An empty batch means the listing is exhausted.
    async fn readdir(&self, handle: BackendHandle) -> io::Result<Vec<Item>>;

    async fn unlink(&self, path: &str) -> io::Result<()>;

    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> io::Result<()>;

    async fn rmdir(&self, path: &str) -> io::Result<()>;

    async fn realpath(&self, path: &str) -> io::Result<String>;

    /// Without `overwrite` an existing `new_path` is an EEXIST error.
    async fn rename(&self, old_path: &str, new_path: &str, overwrite: bool) -> io::Result<()>;

    async fn readlink(&self, _path: &str) -> io::Result<String> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    async fn symlink(&self, _target: &str, _link_path: &str) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    async fn link(&self, _old_path: &str, _new_path: &str) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    async fn statvfs(&self, _path: &str) -> io::Result<VfsStats> {
        Err(io::Error::from_raw_os_error(libc::ENOSYS))
    }

    /// Copy `len` bytes (0 = to end of file) between two open files.
    async fn fcopy(
        &self,
        from: BackendHandle,
        from_offset: u64,
        len: u64,
        to: BackendHandle,
        to_offset: u64,
    ) -> io::Result<()> {
        let mut copied = 0u64;
        while len == 0 || copied < len {
            let want = if len == 0 {
                MAX_READ_BLOCK_LENGTH
            } else {
                (len - copied).min(u64::from(MAX_READ_BLOCK_LENGTH)) as u32
            };
            let data = self.read(from, from_offset + copied, want).await?;
            if data.is_empty() {
                break;
            }
            let n = data.len() as u64;
            self.write(to, to_offset + copied, data).await?;
            copied += n;
        }
        Ok(())
    }

    /// Hash `len` bytes (0 = to end of file) in blocks of `block_size`
    /// (0 = one block). Returns the algorithm chosen from the comma-separated
    /// `algorithms` list and the concatenated digests.
    async fn fhash(
        &self,
        handle: BackendHandle,
        algorithms: &str,
        offset: u64,
        len: u64,
        block_size: u32,
    ) -> io::Result<(String, Vec<u8>)> {
        let algorithm = algorithms
            .split(',')
            .map(str::trim)
            .find(|a| HASH_ALGORITHMS.contains(a))
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOSYS))?
            .to_string();

        let mut hasher = BlockHasher::new(&algorithm);
        let mut hashes = Vec::new();
        let mut in_block = 0u64;
        let mut done = 0u64;

        while len == 0 || done < len {
            let mut want = u64::from(MAX_READ_BLOCK_LENGTH);
            if len != 0 {
                want = want.min(len - done);
            }
            if block_size != 0 {
                want = want.min(u64::from(block_size) - in_block);
            }
            let data = self.read(handle, offset + done, want as u32).await?;
            if data.is_empty() {
                break;
            }
            hasher.update(&data);
            done += data.len() as u64;
            in_block += data.len() as u64;
            if block_size != 0 && in_block == u64::from(block_size) {
                hashes.extend(hasher.finish_block());
                in_block = 0;
            }
        }
        if in_block > 0 || hashes.is_empty() {
            hashes.extend(hasher.finish_block());
        }
        Ok((algorithm, hashes))
    }
}

/// Digest state for one of [`HASH_ALGORITHMS`].
enum BlockHasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl BlockHasher {
    fn new(algorithm: &str) -> Self {
        match algorithm {
            "sha512" => BlockHasher::Sha512(Sha512::new()),
            "sha384" => BlockHasher::Sha384(Sha384::new()),
            "sha224" => BlockHasher::Sha224(Sha224::new()),
            _ => BlockHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            BlockHasher::Sha224(h) => h.update(data),
            BlockHasher::Sha256(h) => h.update(data),
            BlockHasher::Sha384(h) => h.update(data),
            BlockHasher::Sha512(h) => h.update(data),
        }
    }

    /// Digest of the current block; resets for the next one.
    fn finish_block(&mut self) -> Vec<u8> {
        match self {
            BlockHasher::Sha224(h) => h.finalize_reset().to_vec(),
            BlockHasher::Sha256(h) => h.finalize_reset().to_vec(),
            BlockHasher::Sha384(h) => h.finalize_reset().to_vec(),
            BlockHasher::Sha512(h) => h.finalize_reset().to_vec(),
        }
    }
}
