//! Bulk metadata listing loaded from a local file.
//!
//! The file is a sequence of records separated by two NUL bytes. Each record
//! is `path\0mtime atime blocks size mode`, with `path` relative to the root
//! and `mode` in `ls -l` form (`drwxr-xr-x`). Fractional timestamps are
//! truncated. The file is re-read whenever its mtime moves forward.

use super::remote::{Errno, Stat};

use dashmap::DashSet;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::{Duration, Instant, SystemTime};

/// How often the file is checked for changes.
pub const METADATA_RELOAD_INTERVAL: Duration = Duration::from_millis(2500);

#[derive(Debug, Default)]
struct Listing {
    entries: BTreeMap<String, Stat>,
    modified: Option<SystemTime>,
    ready: bool,
}

/// Metadata snapshot answering attribute and listing lookups.
///
/// Paths changed through the adapter since the last load are marked dirty
/// and left to the network until the file is loaded again.
#[derive(Debug)]
pub struct MetadataFile {
    path: PathBuf,
    listing: RwLock<Listing>,
    dirty: DashSet<String>,
}

impl MetadataFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            listing: RwLock::new(Listing::default()),
            dirty: DashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn listing(&self) -> RwLockReadGuard<'_, Listing> {
        self.listing.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a load has succeeded.
    pub fn is_ready(&self) -> bool {
        self.listing().ready
    }

    /// Re-read the file if it changed. Returns true when a new snapshot was
    /// installed. A missing or unreadable file keeps the previous snapshot.
    pub async fn reload(&self) -> bool {
        let modified = match tokio::fs::metadata(&self.path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(target: "sftp-pipe::metadata", path = %self.path.display(), "metadata file missing, will retry");
                return false;
            }
            Err(e) => {
                tracing::warn!(target: "sftp-pipe::metadata", path = %self.path.display(), error = %e, "metadata file unreadable");
                return false;
            }
        };
        if self.listing().modified.is_some_and(|last| modified <= last) {
            return false;
        }
        if self.path.extension().is_some_and(|ext| ext == "lz4") {
            tracing::warn!(target: "sftp-pipe::metadata", path = %self.path.display(), "lz4 metadata files are not supported");
            return false;
        }

        let start = Instant::now();
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(target: "sftp-pipe::metadata", path = %self.path.display(), error = %e, "metadata file unreadable");
                return false;
            }
        };
        let entries = parse(&text);
        let count = entries.len();
        {
            let mut listing = self.listing.write().unwrap_or_else(PoisonError::into_inner);
            *listing = Listing {
                entries,
                modified: Some(modified),
                ready: true,
            };
        }
        self.dirty.clear();
        tracing::debug!(target: "sftp-pipe::metadata", path = %self.path.display(), count, elapsed = ?start.elapsed(), "metadata loaded");
        true
    }

    /// Stop answering for `path` until the next load.
    pub fn mark_dirty(&self, path: &str) {
        self.dirty.insert(path.to_string());
    }

    /// Attributes of `path`, or `None` when the snapshot cannot answer.
    pub fn getattr(&self, path: &str) -> Option<Result<Stat, Errno>> {
        if self.dirty.contains(path) {
            return None;
        }
        let listing = self.listing();
        if !listing.ready {
            return None;
        }
        match listing.entries.get(path) {
            Some(stat) => Some(Ok(stat.clone())),
            // Listings are relative to the root and never carry it.
            None if path == "/" => None,
            None => Some(Err(libc::ENOENT)),
        }
    }

    /// Direct children of `path` with their attributes. A directory the
    /// snapshot does not know lists as empty.
    pub fn readdir(&self, path: &str) -> Option<Vec<(String, Stat)>> {
        if self.dirty.contains(path) {
            return None;
        }
        let listing = self.listing();
        if !listing.ready {
            return None;
        }
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        let children = listing
            .entries
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .filter_map(|(name, stat)| {
                let child = &name[prefix.len()..];
                (!child.is_empty() && !child.contains('/')).then(|| (child.to_string(), stat.clone()))
            })
            .collect();
        Some(children)
    }
}

/// Parse every well-formed record, keyed by absolute path.
fn parse(text: &str) -> BTreeMap<String, Stat> {
    text.split("\0\0")
        .filter_map(|record| {
            let record = record.trim_matches(|c: char| c == '\0' || c == '\n');
            let (name, fields) = record.split_once('\0')?;
            let name = name.trim_start_matches("./").trim_start_matches('/');
            if name.is_empty() {
                return None;
            }
            Some((format!("/{}", name), parse_stat(fields)?))
        })
        .collect()
}

fn parse_stat(fields: &str) -> Option<Stat> {
    let mut fields = fields.split_whitespace();
    let mtime = parse_int(fields.next()?)?;
    let atime = parse_int(fields.next()?)?;
    let blocks = parse_int(fields.next()?)?;
    let size = parse_int(fields.next()?)?;
    let mode = symbolic_mode(fields.next()?)?;
    Some(Stat {
        mode,
        size,
        uid: 0,
        gid: 0,
        atime: u32::try_from(atime).ok()?,
        mtime: u32::try_from(mtime).ok()?,
        ctime: u32::try_from(mtime).ok()?,
        blocks,
    })
}

/// Integer part of a possibly fractional number.
fn parse_int(field: &str) -> Option<u64> {
    field.split('.').next()?.parse().ok()
}

/// `drwxr-xr-x` style mode string to a numeric mode with file type bits.
fn symbolic_mode(symbolic: &str) -> Option<u32> {
    let mut chars = symbolic.chars();
    let kind = match chars.next()? {
        'd' => libc::S_IFDIR,
        'l' => libc::S_IFLNK,
        _ => libc::S_IFREG,
    } as u32;
    let mut perms = 0u32;
    for (i, c) in chars.take(9).enumerate() {
        let bit = 1 << (8 - i);
        match c {
            'r' | 'w' | 'x' => perms |= bit,
            '-' => {}
            _ => return None,
        }
    }
    Some(kind | perms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "a.txt\01700000000.5 1700000100 8 42 -rw-r--r--\0\0\
                          d\01700000000 1700000000 0 4096 drwxr-xr-x\0\0\
                          d/x\01700000000 1700000000 0 3 -rwx------\0\0\
                          d/sub/deep\01700000000 1700000000 0 1 -rw-r--r--\0\0\
                          broken\0\0";

    fn loaded(text: &str) -> MetadataFile {
        let file = MetadataFile::new("unused");
        *file.listing.write().unwrap() = Listing {
            entries: parse(text),
            modified: None,
            ready: true,
        };
        file
    }

    #[test]
    fn test_symbolic_mode() {
        assert_eq!(symbolic_mode("drwxr-xr-x"), Some(libc::S_IFDIR as u32 | 0o755));
        assert_eq!(symbolic_mode("-rw-r--r--"), Some(libc::S_IFREG as u32 | 0o644));
        assert_eq!(symbolic_mode("lrwxrwxrwx"), Some(libc::S_IFLNK as u32 | 0o777));
        assert_eq!(symbolic_mode("-rw?r--r--"), None);
        assert_eq!(symbolic_mode(""), None);
    }

    #[test]
    fn test_parse_records() {
        let entries = parse(SAMPLE);
        assert_eq!(entries.len(), 4);
        let a = &entries["/a.txt"];
        assert_eq!((a.mtime, a.atime, a.ctime), (1700000000, 1700000100, 1700000000));
        assert_eq!((a.blocks, a.size), (8, 42));
        assert!(!entries.contains_key("/broken"));
    }

    #[test]
    fn test_lookups() {
        let file = loaded(SAMPLE);
        assert_eq!(file.getattr("/a.txt").unwrap().unwrap().size, 42);
        assert_eq!(file.getattr("/missing"), Some(Err(libc::ENOENT)));
        assert_eq!(file.getattr("/"), None);

        let names = |path| {
            file.readdir(path)
                .unwrap()
                .into_iter()
                .map(|(name, _)| name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names("/"), vec!["a.txt", "d"]);
        assert_eq!(names("/d"), vec!["x"]);
        assert!(names("/nowhere").is_empty());
    }

    #[test]
    fn test_dirty_paths_fall_through() {
        let file = loaded(SAMPLE);
        file.mark_dirty("/d");
        assert!(file.readdir("/d").is_none());
        assert!(file.getattr("/d").is_none());
        assert!(file.getattr("/a.txt").is_some());
    }

    #[tokio::test]
    async fn test_reload_follows_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");
        let file = MetadataFile::new(&path);
        assert!(!file.reload().await);
        assert!(!file.is_ready());
        assert!(file.getattr("/a.txt").is_none());

        std::fs::write(&path, SAMPLE).unwrap();
        assert!(file.reload().await);
        assert!(file.is_ready());
        assert!(!file.reload().await);

        file.mark_dirty("/a.txt");
        std::fs::write(&path, "a.txt\01 1 0 7 -rw-r--r--").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert!(file.reload().await);
        assert_eq!(file.getattr("/a.txt").unwrap().unwrap().size, 7);
        assert_eq!(file.getattr("/d"), Some(Err(libc::ENOENT)));
    }

    #[tokio::test]
    async fn test_lz4_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.lz4");
        std::fs::write(&path, SAMPLE).unwrap();
        let file = MetadataFile::new(&path);
        assert!(!file.reload().await);
        assert!(!file.is_ready());
    }
}
