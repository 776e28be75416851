//! Flow - 外部から見える 1 ジョブ（1 フロー = 1 タスク）
//!
//! フローの状態は背後のタスクをポーリングして写し取るだけで、
//! 独自に遷移することはありません。

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::{FlowId, TaskId};
use super::outcome::Progress;
use super::state::{Priority, TaskStatus};
use crate::registry::TaskRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl FlowStatus {
    /// Waiting tasks show up as Pending flows.
    pub fn from_task(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending | TaskStatus::Waiting => FlowStatus::Pending,
            TaskStatus::Running => FlowStatus::Running,
            TaskStatus::Completed => FlowStatus::Completed,
            TaskStatus::Failed => FlowStatus::Failed,
            TaskStatus::Cancelled => FlowStatus::Cancelled,
        }
    }

    /// Counted against the concurrent-flow cap.
    pub fn is_active(self) -> bool {
        matches!(self, FlowStatus::Pending | FlowStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    pub task_id: TaskId,

    /// Flow this one continues, if any.
    pub parent: Option<FlowId>,

    pub input: serde_json::Value,
    pub config: serde_json::Value,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,

    pub status: FlowStatus,
    pub progress: Progress,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlowRecord {
    /// Copy the task's current state forward.
    pub fn sync_from_task(&mut self, task: &TaskRecord) {
        self.status = FlowStatus::from_task(task.status);
        self.progress = task.progress.clone();
        self.result = task.result().cloned();
        self.error = task.error().cloned();
        self.started_at = task.started_at;
        self.completed_at = task.completed_at;
    }

    /// Terminal for longer than `retention` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.completed_at {
            Some(done) if self.status.is_terminal() => done + retention <= now,
            _ => false,
        }
    }
}
