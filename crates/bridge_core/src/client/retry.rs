//! Exponential backoff for idempotent remote calls.

use crate::config::ClientConfig;
use std::time::Duration;

/// How many times, and how patiently, an idempotent call is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier.max(1),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Total attempts permitted for a call with the given idempotency.
    pub fn attempts_for(&self, idempotent: bool) -> u32 {
        if idempotent {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}
