//! Retry policies for the two call shapes

use std::time::Duration;

use super::backoff::{backoff_delay, exponential_backoff};

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed for transient failures (flood waits do not count)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Uniform jitter ratio applied to each backoff delay
    pub jitter: f64,
    /// Added to every server-mandated wait
    pub throttle_buffer: Duration,
    /// Longest server-mandated wait to sit out; `None` waits however long is asked
    pub max_throttle_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::throwing()
    }
}

impl RetryPolicy {
    /// Defaults for `retry_with_backoff`: 5 retries, 1s base, 60s cap
    #[must_use]
    pub const fn throwing() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
            throttle_buffer: Duration::from_secs(1),
            max_throttle_wait: None,
        }
    }

    /// Defaults for `safe_execute`: 3 retries, 1s base, 30s cap
    #[must_use]
    pub const fn safe() -> Self {
        Self {
            max_retries: 3,
            max_delay: Duration::from_secs(30),
            ..Self::throwing()
        }
    }

    /// Defaults for long message transfers: 5 retries, 2s base, capped at the
    /// userbot flood-sleep threshold (180s)
    #[must_use]
    pub const fn transfer() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(180),
            ..Self::throwing()
        }
    }

    /// Set maximum retries
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set base delay
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set backoff ceiling
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set jitter ratio (0 disables jitter)
    #[must_use]
    pub const fn jitter(mut self, ratio: f64) -> Self {
        self.jitter = ratio;
        self
    }

    /// Refuse server-mandated waits longer than `limit`
    #[must_use]
    pub const fn max_throttle_wait(mut self, limit: Duration) -> Self {
        self.max_throttle_wait = Some(limit);
        self
    }

    /// Delay before retry number `attempt`, without jitter
    #[must_use]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay)
    }

    /// Delay before retry number `attempt`, with jitter
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        exponential_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }

    /// Whether a server-mandated wait of `wait` is too long to sit out
    #[must_use]
    pub fn refuses_throttle(&self, wait: Duration) -> bool {
        self.max_throttle_wait.is_some_and(|limit| wait > limit)
    }
}
