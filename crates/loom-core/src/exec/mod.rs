//! Executors - 実行戦略
//!
//! 3 つの戦略が同じ契約を持ちます:
//! - `try_acquire()`: 実行スロットの確保（マネージャのアドミッション時、ブロックしない）
//! - `run_attempt()`: 1 回分の試行を実行し、panic も含めて `WorkResult` に変換
//!
//! スロット数の上限はセマフォで表現し、プール内部ではなくアドミッション段階で止めます。

pub mod cooperative;
pub mod deadline;
pub mod pooled;
pub mod sequential;
pub mod work;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::{ExecutorKind, TaskError};

pub use cooperative::CooperativeExecutor;
pub use pooled::PooledExecutor;
pub use sequential::SequentialExecutor;
pub use work::{ProgressReporter, TaskContext, Work, WorkResult};

#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Maximum number of tasks this executor runs at once.
    fn capacity(&self) -> usize;

    /// Take a free execution slot, if any.
    fn try_acquire(&self) -> Option<OwnedSemaphorePermit>;

    /// Run one attempt. Errors and panics raised by the work come back as
    /// `Err`; nothing propagates to the caller uncaught.
    async fn run_attempt(&self, work: &Work, ctx: TaskContext) -> WorkResult;
}

/// Fixed number of execution slots.
#[derive(Debug, Clone)]
pub(crate) struct Slots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Slots {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }
}

pub(crate) fn run_blocking_guarded(work: &Work, ctx: TaskContext) -> WorkResult {
    match work {
        Work::Blocking(f) => catch_unwind(AssertUnwindSafe(|| f(ctx)))
            .unwrap_or_else(|panic| Err(panic_error(panic))),
        Work::Async(_) => Err(TaskError::validation(
            "async work cannot run on a worker thread",
        )),
    }
}

pub(crate) async fn run_async_guarded(work: &Work, ctx: TaskContext) -> WorkResult {
    match work {
        Work::Async(f) => {
            // creating the future may panic as well as polling it
            let fut = match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                Ok(fut) => fut,
                Err(panic) => return Err(panic_error(panic)),
            };
            AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)))
        }
        Work::Blocking(_) => Err(TaskError::validation(
            "blocking work cannot run on the async executor",
        )),
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> TaskError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    TaskError::execution(format!("work panicked: {message}"))
}
