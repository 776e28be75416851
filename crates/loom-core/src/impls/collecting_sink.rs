//! CollectingEventSink - 受け取ったイベントをメモリに溜める（テスト・デモ用）

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::{TaskEvent, TaskEventKind, TaskId};
use crate::ports::{EventSink, EventSinkError};

#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event kinds for one task, in delivery order.
    pub fn kinds_for(&self, task_id: TaskId) -> Vec<TaskEventKind> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(TaskEvent::kind)
            .collect()
    }

    fn push(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn task_created(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }

    async fn task_started(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }

    async fn task_progress(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }

    async fn task_completed(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }

    async fn task_failed(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }

    async fn task_cancelled(&self, event: &TaskEvent) -> Result<(), EventSinkError> {
        self.push(event)
    }
}
