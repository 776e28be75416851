//! Sequential executor - 呼び出し元でインライン実行（同時実行数 1）
//!
//! 決定的な実行順が欲しいテストやデバッグ用。blocking work もそのまま
//! 呼び出し元のスレッドで実行するので、長時間の処理には向きません。

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;

use super::{Executor, Slots, TaskContext, Work, WorkResult, run_async_guarded, run_blocking_guarded};
use crate::domain::ExecutorKind;

#[derive(Debug, Clone)]
pub struct SequentialExecutor {
    slots: Slots,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self {
            slots: Slots::new(1),
        }
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential
    }

    fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.try_acquire()
    }

    async fn run_attempt(&self, work: &Work, ctx: TaskContext) -> WorkResult {
        if work.is_blocking() {
            run_blocking_guarded(work, ctx)
        } else {
            run_async_guarded(work, ctx).await
        }
    }
}
