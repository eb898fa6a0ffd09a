//! Session tuning.

use crate::protocol::{DEFAULT_MAX_PACKET_SIZE, MAX_READ_BLOCK_LENGTH};

/// Default byte budget for the entries of one READDIR response.
pub const DEFAULT_READDIR_BUDGET: usize = 0x7000;

/// Configuration for a server session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of the response channel (pending responses).
    pub response_channel_size: usize,

    /// Largest frame the session will emit.
    pub max_packet_size: usize,

    /// Bytes of directory entries packed into one NAME response. Batches
    /// are also capped so the frame stays within `max_packet_size`.
    pub readdir_budget: usize,

    /// READ requests asking for more than this are clamped.
    pub max_read_len: u32,

    /// Parent span for the session's log events.
    pub span: tracing::Span,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            response_channel_size: 1024,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            readdir_budget: DEFAULT_READDIR_BUDGET,
            max_read_len: MAX_READ_BLOCK_LENGTH,
            span: tracing::Span::none(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response channel size.
    pub fn response_channel_size(mut self, size: usize) -> Self {
        self.response_channel_size = size;
        self
    }

    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the READDIR byte budget.
    pub fn readdir_budget(mut self, budget: usize) -> Self {
        self.readdir_budget = budget;
        self
    }

    pub fn max_read_len(mut self, len: u32) -> Self {
        self.max_read_len = len;
        self
    }

    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.response_channel_size, 1024);
        assert_eq!(config.max_packet_size, 34000);
        assert_eq!(config.readdir_budget, 0x7000);
        assert_eq!(config.max_read_len, 0x8000);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::new()
            .response_channel_size(16)
            .readdir_budget(256);

        assert_eq!(config.response_channel_size, 16);
        assert_eq!(config.readdir_budget, 256);
    }
}
