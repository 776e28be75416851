//! Outcome model: terminal results and in-flight progress.
//!
//! A terminal task carries exactly one `TaskOutcome`; accessors match on it
//! instead of probing optional fields.

use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::state::TaskStatus;

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Completed { result: serde_json::Value },
    Failed { error: TaskError, attempts: u32 },
    Cancelled,
}

impl TaskOutcome {
    /// The terminal status this outcome corresponds to.
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match self {
            TaskOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Convert into the value `execute(wait = true)` hands back.
    pub fn into_result(self) -> Result<serde_json::Value, TaskError> {
        match self {
            TaskOutcome::Completed { result } => Ok(result),
            TaskOutcome::Failed { error, .. } => Err(error),
            TaskOutcome::Cancelled => Err(TaskError::Cancelled),
        }
    }
}

/// Progress of a running task.
///
/// `phase` is an optional label for multi-phase jobs (e.g. "planning", "writing");
/// the engine treats it as opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub fraction: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Progress {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction: clamp_fraction(fraction),
            message: None,
            phase: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Merge a report into the current progress.
    ///
    /// The fraction never decreases; message and phase always take the latest value.
    pub fn advance(&mut self, update: Progress) {
        let fraction = clamp_fraction(update.fraction);
        if fraction > self.fraction {
            self.fraction = fraction;
        }
        if update.message.is_some() {
            self.message = update.message;
        }
        if update.phase.is_some() {
            self.phase = update.phase;
        }
    }

    pub fn complete() -> Self {
        Self::new(1.0)
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic() {
        let mut p = Progress::new(0.5);
        p.advance(Progress::new(0.2).with_message("late report"));
        assert_eq!(p.fraction, 0.5);
        assert_eq!(p.message.as_deref(), Some("late report"));

        p.advance(Progress::new(0.8).with_phase("writing"));
        assert_eq!(p.fraction, 0.8);
        assert_eq!(p.phase.as_deref(), Some("writing"));
        assert_eq!(p.message.as_deref(), Some("late report"));
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(Progress::new(3.0).fraction, 1.0);
        assert_eq!(Progress::new(-1.0).fraction, 0.0);
        assert_eq!(Progress::new(f64::NAN).fraction, 0.0);
    }

    #[test]
    fn outcome_accessors_are_exclusive() {
        let done = TaskOutcome::Completed {
            result: serde_json::json!(42),
        };
        assert_eq!(done.result(), Some(&serde_json::json!(42)));
        assert!(done.error().is_none());

        let failed = TaskOutcome::Failed {
            error: TaskError::execution("x"),
            attempts: 3,
        };
        assert!(failed.result().is_none());
        assert_eq!(failed.status(), TaskStatus::Failed);

        assert!(TaskOutcome::Cancelled.result().is_none());
        assert!(TaskOutcome::Cancelled.error().is_none());
        assert_eq!(
            TaskOutcome::Cancelled.into_result(),
            Err(TaskError::Cancelled)
        );
    }

    #[test]
    fn outcome_is_tagged_by_status() {
        let v = serde_json::to_value(TaskOutcome::Cancelled).unwrap();
        assert_eq!(v["status"], "CANCELLED");
    }
}
