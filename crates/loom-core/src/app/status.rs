//! Status - 外部（HTTP 層・ダッシュボード）向けの安定したビュー
//!
//! このモジュールの型はそのままクライアントへシリアライズされるため、
//! フィールド名を変えないこと。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FlowId, FlowRecord, FlowStatus, Progress, TaskId, TaskStatus};
use crate::registry::TaskRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub progress: Progress,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&TaskRecord> for TaskView {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            progress: record.progress.clone(),
            error: record.error().map(ToString::to_string),
            attempts: record.attempt_count,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowView {
    pub flow_id: FlowId,
    pub task_id: TaskId,
    pub status: FlowStatus,
    pub progress: Progress,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub config: serde_json::Value,
}

impl From<&FlowRecord> for FlowView {
    fn from(flow: &FlowRecord) -> Self {
        Self {
            flow_id: flow.flow_id,
            task_id: flow.task_id,
            status: flow.status,
            progress: flow.progress.clone(),
            error: flow.error.as_ref().map(ToString::to_string),
            created_at: flow.created_at,
            started_at: flow.started_at,
            completed_at: flow.completed_at,
            metadata: flow.metadata.clone(),
            config: flow.config.clone(),
        }
    }
}
