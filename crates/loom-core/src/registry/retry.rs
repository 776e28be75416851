//! Retry policy: backoff delays and the per-task execution policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TaskError;

/// Exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// Delay before the next retry, given the number of attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base_delay=1s, multiplier=2.0:
    /// - attempt 1 (first failure): 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // try_from_secs_f64 rejects overflow / NaN; saturate instead of panicking
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0)
    }
}

/// Execution policy fixed at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    /// Retries after the first attempt; attempts are bounded by `max_retries + 1`.
    pub max_retries: u32,

    pub retry: RetryPolicy,

    /// Per-attempt deadline.
    pub timeout: Option<Duration>,
}

impl ExecutionPolicy {
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(TaskError::validation("timeout must be greater than zero"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(TaskError::validation(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }
}
