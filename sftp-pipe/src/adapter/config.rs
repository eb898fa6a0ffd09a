//! Adapter configuration. Cache option names follow sshfs.

use super::backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_FACTOR, DEFAULT_MAX_DELAY};
use super::cache::DEFAULT_CACHE_CAPACITY;
use crate::client::ClientOptions;
use std::path::PathBuf;
use std::time::Duration;

/// Default TTL for every cache without its own override.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(20);

/// Buffered writes per descriptor before a forced flush.
pub const DEFAULT_WRITE_COALESCE_LIMIT: usize = 50;

/// Configuration for [`RemoteFs`](super::RemoteFs).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// TTL for caches without an override. Zero disables them.
    pub cache_timeout: Duration,

    /// Attribute cache TTL. Zero disables it.
    pub cache_stat_timeout: Option<Duration>,

    /// Directory listing cache TTL. Zero disables it.
    pub cache_dir_timeout: Option<Duration>,

    /// Symlink target cache TTL. Zero disables it.
    pub cache_link_timeout: Option<Duration>,

    /// Most entries kept in each cache.
    pub cache_capacity: u64,

    /// Local listing of remote metadata used to answer `getattr` and
    /// `readdir` without a round trip.
    pub metadata_file: Option<PathBuf>,

    /// Local file that collects the name of every file read.
    pub read_tracking_file: Option<PathBuf>,

    /// Reconnect automatically when the connection drops.
    pub reconnect: bool,

    pub reconnect_base_delay: Duration,
    pub reconnect_factor: f64,
    pub reconnect_max_delay: Duration,

    /// Buffered writes per descriptor before a forced flush.
    pub write_coalesce_limit: usize,

    /// Options for each underlying client connection.
    pub client: ClientOptions,

    /// Span that adapter log events and tasks are attached to.
    pub span: tracing::Span,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            cache_stat_timeout: None,
            cache_dir_timeout: None,
            cache_link_timeout: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            metadata_file: None,
            read_tracking_file: None,
            reconnect: true,
            reconnect_base_delay: DEFAULT_BASE_DELAY,
            reconnect_factor: DEFAULT_FACTOR,
            reconnect_max_delay: DEFAULT_MAX_DELAY,
            write_coalesce_limit: DEFAULT_WRITE_COALESCE_LIMIT,
            client: ClientOptions::default(),
            span: tracing::Span::none(),
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_timeout(mut self, ttl: Duration) -> Self {
        self.cache_timeout = ttl;
        self
    }

    pub fn cache_stat_timeout(mut self, ttl: Duration) -> Self {
        self.cache_stat_timeout = Some(ttl);
        self
    }

    pub fn cache_dir_timeout(mut self, ttl: Duration) -> Self {
        self.cache_dir_timeout = Some(ttl);
        self
    }

    pub fn cache_link_timeout(mut self, ttl: Duration) -> Self {
        self.cache_link_timeout = Some(ttl);
        self
    }

    pub fn cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn metadata_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_file = Some(path.into());
        self
    }

    pub fn read_tracking_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_tracking_file = Some(path.into());
        self
    }

    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn reconnect_delays(mut self, base: Duration, factor: f64, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_factor = factor;
        self.reconnect_max_delay = max;
        self
    }

    pub fn write_coalesce_limit(mut self, limit: usize) -> Self {
        self.write_coalesce_limit = limit;
        self
    }

    pub fn client(mut self, options: ClientOptions) -> Self {
        self.client = options;
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn stat_ttl(&self) -> Option<Duration> {
        self.effective(self.cache_stat_timeout)
    }

    pub fn dir_ttl(&self) -> Option<Duration> {
        self.effective(self.cache_dir_timeout)
    }

    pub fn link_ttl(&self) -> Option<Duration> {
        self.effective(self.cache_link_timeout)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_base_delay,
            self.reconnect_factor,
            self.reconnect_max_delay,
        )
    }

    fn effective(&self, ttl: Option<Duration>) -> Option<Duration> {
        let ttl = ttl.unwrap_or(self.cache_timeout);
        (!ttl.is_zero()).then_some(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdapterConfig::default();
        assert_eq!(config.stat_ttl(), Some(Duration::from_secs(20)));
        assert_eq!(config.dir_ttl(), Some(Duration::from_secs(20)));
        assert!(config.reconnect);
        assert_eq!(config.write_coalesce_limit, 50);
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(config.metadata_file.is_none());
        assert!(config.read_tracking_file.is_none());
    }

    #[test]
    fn test_overrides_and_disable() {
        let config = AdapterConfig::new()
            .cache_timeout(Duration::ZERO)
            .cache_link_timeout(Duration::from_secs(5));
        assert_eq!(config.stat_ttl(), None);
        assert_eq!(config.dir_ttl(), None);
        assert_eq!(config.link_ttl(), Some(Duration::from_secs(5)));

        let config = AdapterConfig::new().cache_stat_timeout(Duration::ZERO);
        assert_eq!(config.stat_ttl(), None);
        assert_eq!(config.dir_ttl(), Some(DEFAULT_CACHE_TIMEOUT));
    }
}
