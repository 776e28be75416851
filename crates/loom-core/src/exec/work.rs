//! Unit of work - 実行される処理とその実行コンテキスト
//!
//! 呼び出し側のクロージャは `Result<T, E>`（`T: Serialize`, `E: Display`）を返します。
//! 境界で `serde_json::Value` / `TaskError` に変換されるため、スケジューラは
//! 中身を一切見ません。リトライ時には同じクロージャが再度呼ばれます。

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::{Progress, TaskError, TaskId};

pub type WorkResult = Result<serde_json::Value, TaskError>;

type AsyncFn = dyn Fn(TaskContext) -> BoxFuture<'static, WorkResult> + Send + Sync;
type BlockingFn = dyn Fn(TaskContext) -> WorkResult + Send + Sync;

/// A cheaply clonable unit of work.
#[derive(Clone)]
pub enum Work {
    /// I/O-bound; runs on the async runtime.
    Async(Arc<AsyncFn>),

    /// CPU-bound; runs on a worker thread.
    Blocking(Arc<BlockingFn>),
}

impl Work {
    /// ```ignore
    /// let work = Work::from_async(|ctx| async move {
    ///     ctx.checkpoint()?;
    ///     Ok::<_, TaskError>(fetch().await)
    /// });
    /// ```
    pub fn from_async<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize,
        E: fmt::Display + Send + 'static,
    {
        Work::Async(Arc::new(move |ctx| {
            let fut = f(ctx);
            async move { fut.await.map_err(into_task_error).and_then(to_value) }.boxed()
        }))
    }

    pub fn from_blocking<F, T, E>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: fmt::Display + Send + 'static,
    {
        Work::Blocking(Arc::new(move |ctx| {
            f(ctx).map_err(into_task_error).and_then(to_value)
        }))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Work::Blocking(_))
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Async(_) => f.write_str("Work::Async"),
            Work::Blocking(_) => f.write_str("Work::Blocking"),
        }
    }
}

/// `TaskError`s raised by the work itself (e.g. `checkpoint()?`) keep their
/// kind; anything else becomes an execution error.
fn into_task_error<E: fmt::Display + 'static>(error: E) -> TaskError {
    match (&error as &dyn Any).downcast_ref::<TaskError>() {
        Some(task_error) => task_error.clone(),
        None => TaskError::execution(error.to_string()),
    }
}

fn to_value<T: Serialize>(value: T) -> WorkResult {
    serde_json::to_value(value)
        .map_err(|e| TaskError::execution(format!("result is not serializable: {e}")))
}

/// Forwards progress reports into the registry.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(Progress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, progress: Progress) {
        (self.sink)(progress);
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// What a unit of work sees while it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    attempt: u32,
    token: CancellationToken,
    progress: ProgressReporter,
}

impl TaskContext {
    pub fn new(
        task_id: TaskId,
        attempt: u32,
        token: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            attempt,
            token,
            progress,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Token for nested I/O; cancelled on task cancellation or attempt deadline.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Safe point for cooperative cancellation.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn report_progress(&self, fraction: f64, message: Option<&str>) {
        let mut progress = Progress::new(fraction);
        progress.message = message.map(str::to_owned);
        self.progress.report(progress);
    }

    /// Progress inside a named phase of a multi-phase job.
    pub fn report_phase(&self, phase: &str, fraction: f64, message: Option<&str>) {
        let mut progress = Progress::new(fraction).with_phase(phase);
        progress.message = message.map(str::to_owned);
        self.progress.report(progress);
    }
}
