//! Path-keyed TTL caches for attributes, listings and symlink targets.

use super::remote::{parent, FsResult, Stat};
use super::AdapterConfig;

use moka::future::Cache;
use std::time::Duration;

/// Default bound on the number of entries in each cache.
pub const DEFAULT_CACHE_CAPACITY: u64 = 100_000;

fn build<V>(ttl: Option<Duration>, capacity: u64) -> Option<Cache<String, V>>
where
    V: Clone + Send + Sync + 'static,
{
    ttl.map(|ttl| {
        Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build()
    })
}

/// The adapter's caches. A cache whose TTL is disabled is absent, and
/// lookups in it always miss.
pub(crate) struct PathCaches {
    /// Successful lookups and ENOENT; other errors are never stored.
    attrs: Option<Cache<String, FsResult<Stat>>>,
    dirs: Option<Cache<String, Vec<String>>>,
    links: Option<Cache<String, String>>,
}

impl PathCaches {
    pub(crate) fn new(config: &AdapterConfig) -> Self {
        Self {
            attrs: build(config.stat_ttl(), config.cache_capacity),
            dirs: build(config.dir_ttl(), config.cache_capacity),
            links: build(config.link_ttl(), config.cache_capacity),
        }
    }

    pub(crate) async fn attr(&self, path: &str) -> Option<FsResult<Stat>> {
        self.attrs.as_ref()?.get(path).await
    }

    pub(crate) async fn put_attr(&self, path: &str, result: &FsResult<Stat>) {
        let Some(attrs) = &self.attrs else {
            return;
        };
        if matches!(result, Ok(_) | Err(libc::ENOENT)) {
            attrs.insert(path.to_string(), result.clone()).await;
        }
    }

    pub(crate) async fn listing(&self, path: &str) -> Option<Vec<String>> {
        self.dirs.as_ref()?.get(path).await
    }

    pub(crate) async fn put_listing(&self, path: &str, names: &[String]) {
        if let Some(dirs) = &self.dirs {
            dirs.insert(path.to_string(), names.to_vec()).await;
        }
    }

    pub(crate) async fn link(&self, path: &str) -> Option<String> {
        self.links.as_ref()?.get(path).await
    }

    pub(crate) async fn put_link(&self, path: &str, target: &str) {
        if let Some(links) = &self.links {
            links.insert(path.to_string(), target.to_string()).await;
        }
    }

    /// Forget `path` and its parent's listing.
    pub(crate) async fn invalidate(&self, path: &str) {
        if let Some(attrs) = &self.attrs {
            attrs.invalidate(path).await;
        }
        if let Some(dirs) = &self.dirs {
            dirs.invalidate(path).await;
            dirs.invalidate(parent(path)).await;
        }
        if let Some(links) = &self.links {
            links.invalidate(path).await;
        }
    }
}
