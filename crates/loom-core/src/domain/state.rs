//! Task state machine and scheduling priority.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Pending -> Running -> Completed | Failed
/// - Waiting -> Running (all dependencies Completed)
/// - Waiting -> Failed (a dependency Failed or was Cancelled)
/// - Running -> Running (retry, attempt_count + 1)
/// - Pending | Waiting | Running -> Cancelled
///
/// Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Registered without dependencies.
    Pending,

    /// Registered with dependencies that are not all Completed yet.
    Waiting,

    /// Admitted to an executor.
    Running,

    Completed,

    Failed,

    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Terminal states that poison dependents.
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending | Waiting, Running) => true,
            // dependency failure propagation
            (Waiting, Failed) => true,
            (Running, Running | Completed | Failed) => true,
            (Pending | Waiting | Running, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Scheduling priority. Higher variants are always considered first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Execution strategy chosen per registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Inline on the scheduling caller, one at a time.
    Sequential,

    /// Fixed-size worker thread pool, for CPU-bound blocking work.
    Pooled,

    /// Async tasks bounded by an admission semaphore, for I/O-bound work.
    Cooperative,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutorKind::Sequential => "sequential",
            ExecutorKind::Pooled => "pooled",
            ExecutorKind::Cooperative => "cooperative",
        };
        f.write_str(s)
    }
}
