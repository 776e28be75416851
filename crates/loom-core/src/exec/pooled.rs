//! Pooled executor - 固定サイズのワーカースレッドプール（CPU バウンド向け）
//!
//! 実体は rayon の ThreadPool。結果は oneshot で async 側へ戻すので、
//! マネージャ側のスレッドはブロックしません。

use async_trait::async_trait;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::{OwnedSemaphorePermit, oneshot};
use tracing::debug;

use super::{Executor, Slots, TaskContext, Work, WorkResult, run_blocking_guarded};
use crate::domain::{ExecutorKind, TaskError};

pub struct PooledExecutor {
    pool: ThreadPool,
    slots: Slots,
}

impl PooledExecutor {
    /// `pool_size` must be at least 1.
    pub fn new(pool_size: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("loom-worker-{i}"))
            .build()?;
        debug!(pool_size, "worker pool started");
        Ok(Self {
            pool,
            slots: Slots::new(pool_size),
        })
    }
}

#[async_trait]
impl Executor for PooledExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Pooled
    }

    fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.slots.try_acquire()
    }

    async fn run_attempt(&self, work: &Work, ctx: TaskContext) -> WorkResult {
        let (tx, rx) = oneshot::channel();
        let work = work.clone();
        self.pool.spawn(move || {
            let _ = tx.send(run_blocking_guarded(&work, ctx));
        });
        rx.await
            .unwrap_or_else(|_| Err(TaskError::execution("worker thread dropped the attempt")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::context;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_on_a_worker_thread() {
        let exec = PooledExecutor::new(2).unwrap();
        let work = Work::from_blocking(|_ctx| {
            Ok::<_, String>(std::thread::current().name().map(str::to_owned))
        });
        let result = exec.run_attempt(&work, context()).await.unwrap();
        assert!(result.as_str().unwrap().starts_with("loom-worker-"));
    }

    #[tokio::test]
    async fn async_work_is_refused() {
        let exec = PooledExecutor::new(1).unwrap();
        let work = Work::from_async(|_ctx| async { Ok::<_, String>(()) });
        assert!(matches!(
            exec.run_attempt(&work, context()).await,
            Err(TaskError::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn never_exceeds_pool_size() {
        let exec = Arc::new(PooledExecutor::new(2).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let work = {
            let running = running.clone();
            let high_water = high_water.clone();
            Work::from_blocking(move |_ctx| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
        };

        let mut handles = Vec::new();
        for _ in 0..6 {
            let exec = exec.clone();
            let work = work.clone();
            handles.push(tokio::spawn(async move {
                exec.run_attempt(&work, context()).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(high_water.load(Ordering::SeqCst) <= 2);
    }
}
