//! Task record - 1 タスク分の識別子と可変状態

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::ExecutionPolicy;
use crate::domain::{ExecutorKind, Priority, Progress, TaskId, TaskOutcome, TaskStatus};

/// Snapshot of one task as stored in the registry.
///
/// `work` is kept beside the record inside the registry and never appears here;
/// the record is plain data so it can be cloned out and serialized freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Arrival order; FIFO tie-break within a priority class.
    pub seq: u64,

    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,

    pub priority: Priority,
    pub dependencies: Vec<TaskId>,
    pub executor: ExecutorKind,
    pub policy: ExecutionPolicy,

    pub status: TaskStatus,
    pub progress: Progress,

    /// Set exactly once, on the terminal transition.
    pub outcome: Option<TaskOutcome>,

    pub attempt_count: u32,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.outcome.as_ref().and_then(TaskOutcome::result)
    }

    pub fn error(&self) -> Option<&crate::domain::TaskError> {
        self.outcome.as_ref().and_then(TaskOutcome::error)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a state transition. Returns false (and changes nothing) when the
    /// state machine forbids it.
    pub(crate) fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Move into a terminal state carrying `outcome`.
    pub(crate) fn terminate(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> bool {
        if !self.transition(outcome.status(), now) {
            return false;
        }
        if matches!(outcome, TaskOutcome::Completed { .. }) {
            self.progress.advance(Progress::complete());
        }
        self.outcome = Some(outcome);
        true
    }
}
