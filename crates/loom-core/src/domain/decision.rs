//! Decision model: what to do after a failed attempt.
//!
//! The Decider is a pure function of (attempts made, policy, error); applying
//! the decision (sleeping, bumping attempt_count, failing the task) is the
//! task manager's job.

use std::time::Duration;

use super::errors::TaskError;
use crate::registry::ExecutionPolicy;

/// The next action after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Retry the task after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up; the task becomes Failed with the last error.
    GiveUp { reason: String },
}

pub trait Decider: Send + Sync {
    /// `attempts` is the number of attempts made so far (>= 1).
    fn decide(&self, attempts: u32, policy: &ExecutionPolicy, error: &TaskError) -> Decision;
}

/// Attempt-based retry with exponential backoff.
///
/// - retry while `attempts <= max_retries` and the error is retryable
/// - delay = retry_delay * multiplier^(attempts - 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(&self, attempts: u32, policy: &ExecutionPolicy, error: &TaskError) -> Decision {
        if !error.is_retryable() {
            return Decision::GiveUp {
                reason: format!("not retryable: {error}"),
            };
        }
        if attempts > policy.max_retries {
            return Decision::GiveUp {
                reason: format!(
                    "max retries reached: {}/{}",
                    attempts - 1,
                    policy.max_retries
                ),
            };
        }
        let delay = policy.retry.next_delay(attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                attempts + 1,
                policy.max_retries + 1,
                delay
            ),
        }
    }
}
