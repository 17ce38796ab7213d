//! Retry policy for transient tool-server failures.

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_human;

/// Exponential backoff settings.
///
/// `max_attempts` counts the first call, so `1` disables retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,

    #[serde(with = "duration_human")]
    pub min_delay: Duration,

    #[serde(with = "duration_human")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Backoff builder for `backon::Retryable::retry`.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}
