//! Retry policy for protocol dispatch.
//!
//! Bounded attempts with backoff between them. Only transient failures
//! (connection failures, timeouts, transient SOAP faults) are retried.

use std::time::Duration;

use crate::config::DispatchConfig;

/// Retry delays used when no configuration is supplied.
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Attempt limits and backoff schedule for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Vec<Duration>, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            attempt_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.max_attempts,
            config
                .backoff_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            Duration::from_millis(config.attempt_timeout_ms),
        )
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Delay before attempt number `attempt` (1-based). The first attempt
    /// never waits; past the end of the schedule the last entry is reused.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let idx = (attempt - 2) as usize;
        self.backoff
            .get(idx)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            RETRY_DELAYS_MS.len() as u32 + 1,
            RETRY_DELAYS_MS.iter().copied().map(Duration::from_millis).collect(),
            Duration::from_secs(8),
        )
    }
}
