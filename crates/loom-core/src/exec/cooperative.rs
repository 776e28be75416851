//! Cooperative executor - async ランタイム上で多重実行（I/O バウンド向け）
//!
//! 同時実行数はスレッド数ではなくアドミッション用セマフォで制限します。

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;

use super::{Executor, Slots, TaskContext, Work, WorkResult, run_async_guarded};
use crate::domain::ExecutorKind;

#[derive(Debug, Clone)]
pub struct CooperativeExecutor {
    slots: Slots,
}

impl CooperativeExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            slots: Slots::new(concurrency),
        }
    }
}

#[async_trait]
impl Executor for CooperativeExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Cooperative
    }

    fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.try_acquire()
    }

    async fn run_attempt(&self, work: &Work, ctx: TaskContext) -> WorkResult {
        run_async_guarded(work, ctx).await
    }
}
