//! FlowRunner port - フローの本体（リサーチジョブ）
//!
//! FlowManager はジョブの中身を知りません。1 フロー = 1 タスクとして登録し、
//! タスクの work からこの trait を呼び出します。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{FlowId, TaskError};
use crate::exec::TaskContext;

/// Result of the flow being continued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorResult {
    pub flow_id: FlowId,
    pub result: serde_json::Value,
}

/// Everything a runner receives for one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInput {
    pub flow_id: FlowId,

    /// Topic or other job payload.
    pub input: serde_json::Value,

    /// Opaque configuration snapshot.
    pub config: serde_json::Value,

    /// Set for `start_continuous_flow`.
    pub previous: Option<PriorResult>,
}

#[async_trait]
pub trait FlowRunner: Send + Sync {
    /// Run the job body. May be invoked again on retry.
    ///
    /// Long jobs should poll `ctx.checkpoint()` and report structured progress
    /// through `ctx.report_phase`.
    async fn run(
        &self,
        input: FlowInput,
        ctx: TaskContext,
    ) -> Result<serde_json::Value, TaskError>;
}
