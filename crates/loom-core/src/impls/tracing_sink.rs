//! TracingEventSink - イベントを tracing のログとして出力
//!
//! 組み込み側が独自の sink を書かなくても、ライフサイクルが
//! 構造化ログとして残るようにするための実装です。

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{EventDetail, TaskEvent};
use crate::ports::{EventSink, EventSinkError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn task_created(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        if let EventDetail::Created { priority, waiting } = &event.detail {
            debug!(task_id = %event.task_id, name = %event.name, ?priority, waiting, "task created");
        }
        Ok(())
    }

    async fn task_started(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        if let EventDetail::Started { attempt } = &event.detail {
            info!(task_id = %event.task_id, name = %event.name, attempt, "task started");
        }
        Ok(())
    }

    async fn task_progress(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        if let EventDetail::Progress { progress } = &event.detail {
            debug!(
                task_id = %event.task_id,
                fraction = progress.fraction,
                phase = progress.phase.as_deref().unwrap_or("-"),
                message = progress.message.as_deref().unwrap_or(""),
                "task progress"
            );
        }
        Ok(())
    }

    async fn task_completed(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        info!(task_id = %event.task_id, name = %event.name, "task completed");
        Ok(())
    }

    async fn task_failed(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        if let EventDetail::Failed { error, attempts } = &event.detail {
            warn!(task_id = %event.task_id, name = %event.name, attempts, %error, "task failed");
        }
        Ok(())
    }

    async fn task_cancelled(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        info!(task_id = %event.task_id, name = %event.name, "task cancelled");
        Ok(())
    }
}
