//! Retry policy for transient cloud errors.

use std::time::Duration;

use gridform_core::config::{ConfigResult, RetrySection};

/// Bounded exponential backoff.
///
/// `max_attempts` counts the first call, so `max_attempts = 1` never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that gives up on the first error.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(section: &RetrySection) -> ConfigResult<Self> {
        Ok(Self::new(
            section.max_attempts,
            section.base_delay()?,
            section.max_delay()?,
        ))
    }

    /// Whether another attempt is allowed after `attempts` calls have failed.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (0-indexed), capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }
}
