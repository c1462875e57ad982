//! Retry policy for transient attempt outcomes.
//!
//! Bounded exponential backoff with jitter. Only transient classes
//! (lost port race, attempt timeout) are retried; the policy caps how many
//! attempts a single test case may consume.

use pdrive_common::RetryConfig;
use std::time::Duration;

/// Retry policy for a test case.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to delay.
    pub jitter: f64,
    /// Pause before a genuine failure is reported.
    pub failure_grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
            failure_grace: config.failure_grace(),
        }
    }

    /// A policy that retries immediately and reports failures without pause.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            failure_grace: Duration::ZERO,
        }
    }

    /// Calculate backoff delay after a given attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base_delay.as_secs_f64();
        let max_secs = self.max_delay.as_secs_f64().max(0.0);

        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1)) as f64;
        let mut delay = (base_secs * multiplier).min(max_secs);

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = (fastrand::f64() * 2.0 - 1.0) * self.jitter;
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
