//! Dependency/priority scheduling decisions.
//!
//! Pure functions over registry snapshots; the store applies the results
//! under its lock.

use std::cmp::Reverse;

use crate::domain::{Priority, TaskId, TaskStatus};

/// An eligible task, reduced to its ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: TaskId,
    pub priority: Priority,
    pub seq: u64,
}

/// Order candidates by (priority desc, arrival asc).
pub fn admission_order(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (Reverse(c.priority), c.seq));
    candidates
}

/// Where a task stands with respect to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency is Completed.
    Ready,

    /// At least one dependency has not finished yet.
    Blocked,

    /// A dependency ended unsuccessfully; the task must fail.
    Poisoned {
        dependency: TaskId,
        status: TaskStatus,
    },
}

/// Evaluate a dependency list. Unknown dependencies (purged records) count as
/// satisfied: only terminal tasks with no live dependents are ever purged.
pub fn readiness<F>(dependencies: &[TaskId], status_of: F) -> Readiness
where
    F: Fn(TaskId) -> Option<TaskStatus>,
{
    let mut ready = true;
    for &dependency in dependencies {
        match status_of(dependency) {
            Some(status) if status.is_unsuccessful() => {
                return Readiness::Poisoned { dependency, status };
            }
            Some(TaskStatus::Completed) | None => {}
            Some(_) => ready = false,
        }
    }
    if ready {
        Readiness::Ready
    } else {
        Readiness::Blocked
    }
}
