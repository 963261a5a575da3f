//! Exponential backoff for reconnect loops.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(200);
/// Default ceiling for any retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Backoff bounds, shared by every watch loop of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// Doubling delay generator capped at `max_delay`.
///
/// Each retry loop owns its own instance; the counter is advanced through
/// `&mut self` so it is never shared between loops.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns `min(initial_delay << n, max_delay)` for the n-th call and
    /// advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = 2u32
            .checked_pow(self.attempt)
            .and_then(|factor| self.config.initial_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Returns the generator to its initial state.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
