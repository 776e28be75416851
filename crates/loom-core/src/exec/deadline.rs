//! Deadline - 1 試行ごとのタイムアウト
//!
//! - async work: `tokio::time::timeout` で打ち切る（future を drop = 停止）し、
//!   試行トークンも cancel して入れ子の I/O を止める
//! - blocking work: 打ち切れないので、ウォッチドッグが試行トークンを cancel し、
//!   work 側のチェックポイントで止まるのを待つ
//!
//! blocking work の監視は OS スレッドのタイマーで行う。sequential executor は
//! ランタイムのスレッド上でインライン実行するため、current-thread ランタイムでは
//! tokio タスクのタイマーが work の終了まで動けない。
//!
//! どちらの場合も、期限を過ぎて返ってきた試行は TimeoutError として扱います。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Executor, TaskContext, Work, WorkResult};
use crate::domain::TaskError;

/// Cancels the attempt token once the deadline passes. Disarmed on drop.
struct Watchdog {
    _disarm: mpsc::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(token: CancellationToken, limit: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (disarm, disarmed) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("loom-watchdog".into())
            .spawn(move || {
                // 送信側が drop されたら Disconnected で抜ける
                if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(limit) {
                    flag.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start watchdog thread, deadline checked on return only");
        }
        Self {
            _disarm: disarm,
            fired,
        }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Run one attempt under an optional deadline.
///
/// `ctx` must carry a per-attempt token (a child of the task token) so the
/// deadline only cancels this attempt.
pub async fn run_with_deadline(
    executor: &dyn Executor,
    work: &Work,
    ctx: TaskContext,
    timeout: Option<Duration>,
) -> WorkResult {
    let Some(limit) = timeout else {
        return executor.run_attempt(work, ctx).await;
    };

    let task_id = ctx.task_id();
    let token = ctx.token().clone();

    if !work.is_blocking() {
        return match tokio::time::timeout(limit, executor.run_attempt(work, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(task_id = %task_id, ?limit, "attempt deadline elapsed");
                token.cancel();
                Err(TaskError::Timeout(limit))
            }
        };
    }

    let watchdog = Watchdog::arm(token, limit);
    let started = Instant::now();
    let result = executor.run_attempt(work, ctx).await;

    if watchdog.fired() || started.elapsed() > limit {
        debug!(task_id = %task_id, ?limit, "attempt returned after its deadline");
        return Err(TaskError::Timeout(limit));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::context;
    use crate::exec::{CooperativeExecutor, SequentialExecutor};

    #[tokio::test(start_paused = true)]
    async fn slow_async_attempt_times_out() {
        let exec = CooperativeExecutor::new(1);
        let work = Work::from_async(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        });

        let ctx = context();
        let token = ctx.token().clone();
        let started = tokio::time::Instant::now();
        let result = run_with_deadline(&exec, &work, ctx, Some(Duration::from_secs(1))).await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_secs(1))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_attempt_keeps_its_result() {
        let exec = CooperativeExecutor::new(1);
        let work = Work::from_async(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>(42)
        });

        let result =
            run_with_deadline(&exec, &work, context(), Some(Duration::from_secs(1))).await;
        assert_eq!(result, Ok(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn no_timeout_runs_to_completion() {
        let exec = CooperativeExecutor::new(1);
        let work = Work::from_async(|_ctx| async { Ok::<_, String>("done") });
        assert_eq!(
            run_with_deadline(&exec, &work, context(), None).await,
            Ok(serde_json::json!("done"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_attempt_is_stopped_through_its_token() {
        let exec = SequentialExecutor::new();
        let work = Work::from_blocking(|ctx| {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok::<_, String>("stopped")
        });

        let ctx = context();
        let token = ctx.token().clone();
        let result =
            run_with_deadline(&exec, &work, ctx, Some(Duration::from_millis(50))).await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(50))));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn blocking_attempt_is_stopped_on_a_current_thread_runtime() {
        let exec = SequentialExecutor::new();
        let work = Work::from_blocking(|ctx| {
            // 安全弁: ウォッチドッグが動かなくてもテストは止まる
            let give_up = Instant::now() + Duration::from_secs(2);
            while !ctx.is_cancelled() && Instant::now() < give_up {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok::<_, String>("stopped")
        });

        let ctx = context();
        let token = ctx.token().clone();
        let started = Instant::now();
        let result =
            run_with_deadline(&exec, &work, ctx, Some(Duration::from_millis(50))).await;

        assert_eq!(result, Err(TaskError::Timeout(Duration::from_millis(50))));
        assert!(token.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn finished_blocking_attempt_disarms_the_watchdog() {
        let exec = SequentialExecutor::new();
        let work = Work::from_blocking(|_ctx| Ok::<_, String>(7));

        let ctx = context();
        let token = ctx.token().clone();
        let result =
            run_with_deadline(&exec, &work, ctx, Some(Duration::from_millis(30))).await;
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(result, Ok(serde_json::json!(7)));
        assert!(!token.is_cancelled());
    }
}
