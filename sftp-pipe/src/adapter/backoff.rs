//! Reconnect delay schedule.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_FACTOR: f64 = 1.3;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(7500);

/// Geometric backoff: `base`, then ×`factor` per failure, never above `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_FACTOR, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            factor,
            max,
            current: base,
        }
    }

    /// Delay before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next_ms = (self.current.as_millis() as f64 * self.factor).round() as u64;
        self.current = Duration::from_millis(next_ms).min(self.max);
        delay
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}
