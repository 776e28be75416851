//! Events - ライフサイクルイベント
//!
//! 各状態遷移ごとに 1 つの `TaskEvent` が発行されます。
//! 同一タスク内では遷移順に届きますが、タスク間の順序は保証しません。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::TaskId;
use super::outcome::Progress;
use super::state::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventKind {
    TaskCreated,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
}

/// Transition-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDetail {
    Created { priority: Priority, waiting: bool },
    Started { attempt: u32 },
    Progress { progress: Progress },
    Completed { attempts: u32 },
    Failed { error: TaskError, attempts: u32 },
    Cancelled,
}

/// One lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub detail: EventDetail,
}

impl TaskEvent {
    pub fn new(
        task_id: TaskId,
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: EventDetail,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            timestamp,
            detail,
        }
    }

    pub fn kind(&self) -> TaskEventKind {
        match self.detail {
            EventDetail::Created { .. } => TaskEventKind::TaskCreated,
            EventDetail::Started { .. } => TaskEventKind::TaskStarted,
            EventDetail::Progress { .. } => TaskEventKind::TaskProgress,
            EventDetail::Completed { .. } => TaskEventKind::TaskCompleted,
            EventDetail::Failed { .. } => TaskEventKind::TaskFailed,
            EventDetail::Cancelled => TaskEventKind::TaskCancelled,
        }
    }
}
