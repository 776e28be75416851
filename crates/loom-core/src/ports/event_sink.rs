//! EventSink port - ライフサイクルイベントの受け口
//!
//! コアは具体的な観測者（ダッシュボード、ロガー）を知りません。
//! イベント種別ごとに 1 メソッドを持ち、既定実装は何もしません。
//!
//! # 配送の保証
//! - 同一タスクのイベントは遷移順に届く
//! - 失敗（Err / panic）はパブリッシャ側でログに記録して握りつぶす

use async_trait::async_trait;

use crate::domain::{EventDetail, TaskEvent};

#[derive(Debug, thiserror::Error)]
#[error("event sink failed: {0}")]
pub struct EventSinkError(pub String);

impl EventSinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn task_created(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }

    async fn task_started(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }

    async fn task_progress(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }

    async fn task_completed(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }

    async fn task_failed(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }

    async fn task_cancelled(&self, _event: &TaskEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

/// Route an event to the sink method for its kind.
pub async fn dispatch(sink: &dyn EventSink, event: &TaskEvent) -> Result<(), EventSinkError> {
    match event.detail {
        EventDetail::Created { .. } => sink.task_created(event).await,
        EventDetail::Started { .. } => sink.task_started(event).await,
        EventDetail::Progress { .. } => sink.task_progress(event).await,
        EventDetail::Completed { .. } => sink.task_completed(event).await,
        EventDetail::Failed { .. } => sink.task_failed(event).await,
        EventDetail::Cancelled => sink.task_cancelled(event).await,
    }
}
