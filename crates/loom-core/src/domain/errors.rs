//! Errors - 実行エラーの分類
//!
//! - Retryable: Timeout, Execution（max_retries までローカルでリトライ）
//! - Terminal: Dependency, Cancelled（依存タスクへ伝播）
//! - Synchronous: Validation, ResourceExhausted（呼び出し元へ即時返却、状態には残らない）

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    /// Malformed registration; the task is never created.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A dependency ended as Failed or Cancelled.
    #[error("dependency {dependency} ended as {status}")]
    Dependency {
        dependency: TaskId,
        status: TaskStatus,
    },

    /// An attempt exceeded its deadline.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The unit of work returned an error or panicked.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("task was cancelled")]
    Cancelled,

    /// A concurrency cap is saturated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl TaskError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Timeout(_) | TaskError::Execution(_))
    }
}
