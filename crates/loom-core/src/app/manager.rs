//! TaskManager - レジストリ・スケジューラ・エグゼキュータ・リトライを束ねるファサード
//!
//! # 実行の流れ
//! 1. `register()` でレジストリへ PENDING / WAITING として登録
//! 2. `execute()` で submit し、スケジューリングパスを回す
//! 3. パスごとに空きスロット分だけ優先度順にアドミット
//!    - pooled / cooperative: tokio タスクとして起動
//!    - sequential: そのパスを回している呼び出し元でインライン実行
//! 4. 試行 → 失敗なら Decider → バックオフ → 再試行（スロットは保持したまま）
//! 5. 終端遷移を記録してスロットを返し、次のパスを回す

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::publisher::EventPublisher;
use super::spec::TaskSpec;
use super::status::TaskView;
use crate::domain::{
    Decider, Decision, ExecutorKind, TaskError, TaskId, TaskOutcome, TaskStatus,
};
use crate::exec::deadline::run_with_deadline;
use crate::exec::{Executor, ProgressReporter, TaskContext};
use crate::ports::{Clock, IdGenerator};
use crate::registry::{
    Admission, ExecutionPolicy, NewTask, RetryPolicy, TaskCounts, TaskRecord, TaskRegistry,
    wait_outcome,
};

/// The three execution strategies, one instance each.
pub(crate) struct Executors {
    pub(crate) sequential: Arc<dyn Executor>,
    pub(crate) pooled: Arc<dyn Executor>,
    pub(crate) cooperative: Arc<dyn Executor>,
}

impl Executors {
    fn get(&self, kind: ExecutorKind) -> &Arc<dyn Executor> {
        match kind {
            ExecutorKind::Sequential => &self.sequential,
            ExecutorKind::Pooled => &self.pooled,
            ExecutorKind::Cooperative => &self.cooperative,
        }
    }
}

pub(crate) struct ManagerParts {
    pub(crate) executors: Executors,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventPublisher,
    pub(crate) retry_defaults: RetryPolicy,
}

struct Inner {
    registry: Arc<TaskRegistry>,
    executors: Executors,
    decider: Arc<dyn Decider>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
    retry_defaults: RetryPolicy,
}

/// Cheap, clonable handle to one engine instance.
///
/// Build it with [`EngineBuilder`](super::EngineBuilder); tests create
/// independent managers with isolated registries.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub(crate) fn new(parts: ManagerParts) -> Self {
        let registry = Arc::new(TaskRegistry::new(parts.clock.clone(), parts.events.clone()));
        Self {
            inner: Arc::new(Inner {
                registry,
                executors: parts.executors,
                decider: parts.decider,
                ids: parts.ids,
                clock: parts.clock,
                events: parts.events,
                retry_defaults: parts.retry_defaults,
            }),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        self.inner.ids.clone()
    }

    /// Slots of one executor.
    pub fn capacity(&self, kind: ExecutorKind) -> usize {
        self.inner.executors.get(kind).capacity()
    }

    /// Register a task as PENDING (no dependencies) or WAITING.
    ///
    /// Fails with `Validation` for unknown dependencies, a zero timeout, or an
    /// executor that cannot run the given kind of work. The task is not
    /// admitted until `execute` is called for it.
    pub fn register(&self, spec: TaskSpec) -> Result<TaskId, TaskError> {
        let executor = spec.default_executor();
        let defaults = &self.inner.retry_defaults;
        let policy = ExecutionPolicy {
            max_retries: spec.max_retries,
            retry: RetryPolicy::new(
                spec.retry_delay.unwrap_or(defaults.base_delay),
                defaults.multiplier,
            ),
            timeout: spec.timeout,
        };
        let id = self.inner.ids.generate_task_id();
        let status = self.inner.registry.insert(
            id,
            NewTask {
                name: spec.name,
                description: spec.description,
                tags: spec.tags,
                metadata: spec.metadata,
                priority: spec.priority,
                dependencies: spec.dependencies,
                executor,
                policy,
                work: spec.work,
            },
        )?;
        debug!(task_id = %id, %status, %executor, "registered");
        Ok(id)
    }

    /// Submit a task and run a scheduling pass.
    ///
    /// With `wait`, suspends until the task is terminal and returns its
    /// result (or its error). Without, returns `Ok(None)` after admission.
    /// Sequential tasks admitted by this pass run inline before returning.
    pub async fn execute(
        &self,
        id: TaskId,
        wait: bool,
    ) -> Result<Option<serde_json::Value>, TaskError> {
        let completion = self.inner.registry.submit(id)?;
        self.drive().await;
        if !wait {
            return Ok(None);
        }
        wait_outcome(id, completion).await?.into_result().map(Some)
    }

    /// Wait for a terminal outcome without submitting the task.
    pub async fn wait(&self, id: TaskId) -> Result<TaskOutcome, TaskError> {
        let completion = self.inner.registry.subscribe(id)?;
        wait_outcome(id, completion).await
    }

    /// PENDING/WAITING tasks are cancelled at once. RUNNING tasks are
    /// recorded as CANCELLED and their work is asked to stop at its next
    /// checkpoint. Ok(false) when the task is already terminal.
    pub fn cancel(&self, id: TaskId) -> Result<bool, TaskError> {
        let cancelled = self.inner.registry.cancel(id)?;
        if cancelled {
            info!(task_id = %id, "task cancelled");
        }
        Ok(cancelled)
    }

    pub fn get_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner.registry.status(id)
    }

    /// Present only for COMPLETED tasks.
    pub fn get_result(&self, id: TaskId) -> Option<serde_json::Value> {
        self.inner
            .registry
            .get(id)
            .and_then(|r| r.result().cloned())
    }

    /// Typed variant of `get_result`.
    pub fn get_result_as<T: DeserializeOwned>(
        &self,
        id: TaskId,
    ) -> Result<Option<T>, serde_json::Error> {
        self.get_result(id).map(serde_json::from_value).transpose()
    }

    /// Present only for FAILED tasks.
    pub fn get_error(&self, id: TaskId) -> Option<TaskError> {
        self.inner.registry.get(id).and_then(|r| r.error().cloned())
    }

    /// Tasks in arrival order.
    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        self.inner.registry.list(Some(status))
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.inner.registry.get(id)
    }

    pub fn get_view(&self, id: TaskId) -> Option<TaskView> {
        self.inner.registry.get(id).as_ref().map(TaskView::from)
    }

    pub fn counts(&self) -> TaskCounts {
        self.inner.registry.counts()
    }

    /// Forget terminal tasks finished more than `older_than` ago that no live
    /// task depends on.
    pub fn purge_terminal(&self, older_than: Duration) -> usize {
        let older_than = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .inner
            .clock
            .now()
            .checked_sub_signed(older_than)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
        self.inner.registry.purge_terminal(cutoff).len()
    }

    /// Forget the given terminal tasks. Tasks still running, or still
    /// depended on by a live task, are kept.
    pub fn purge(&self, ids: &[TaskId]) -> usize {
        self.inner.registry.purge(ids).len()
    }

    /// Wait until every event published so far reached the sink.
    pub async fn flush_events(&self) {
        self.inner.events.flush().await;
    }

    /// Cancel every non-terminal task. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.inner.registry.cancel_all();
        info!(cancelled, "task manager shut down");
        cancelled
    }

    /// Scheduling passes until no sequential admission is left to run inline.
    async fn drive(&self) {
        loop {
            let inline = self.admit();
            if inline.is_empty() {
                break;
            }
            for admission in inline {
                self.run_task(admission).await;
            }
        }
    }

    /// One scheduling pass. Spawns pooled/cooperative admissions and hands
    /// sequential ones back to the caller.
    fn admit(&self) -> Vec<Admission> {
        let executors = &self.inner.executors;
        let admitted = self
            .inner
            .registry
            .admit(|kind| executors.get(kind).try_acquire());

        let mut inline = Vec::new();
        for admission in admitted {
            if admission.executor == ExecutorKind::Sequential {
                inline.push(admission);
            } else {
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.run_task(admission).await;
                    manager.drive().await;
                });
            }
        }
        inline
    }

    /// Attempt loop of one admitted task. Holds the execution slot until the
    /// terminal transition is recorded.
    async fn run_task(&self, admission: Admission) {
        let Admission {
            id,
            name,
            executor,
            work,
            policy,
            token,
            permit,
        } = admission;
        let executor = self.inner.executors.get(executor).clone();

        let mut attempt = 1;
        let result = loop {
            let ctx = TaskContext::new(id, attempt, token.child_token(), self.progress_reporter(id));
            let error = match run_with_deadline(executor.as_ref(), &work, ctx, policy.timeout).await
            {
                Ok(value) => break Ok(value),
                Err(error) => error,
            };
            if token.is_cancelled() {
                break Err(TaskError::Cancelled);
            }

            match self.inner.decider.decide(attempt, &policy, &error) {
                Decision::Retry { delay, reason } => {
                    info!(task_id = %id, %name, %error, %reason, "scheduling retry");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => break Err(TaskError::Cancelled),
                    }
                    match self.inner.registry.begin_retry(id) {
                        Some(next) => attempt = next,
                        None => break Err(error),
                    }
                }
                Decision::GiveUp { reason } => {
                    debug!(task_id = %id, %name, %reason, "giving up");
                    break Err(error);
                }
            }
        };

        self.inner.registry.finish(id, result);
        drop(permit);
    }

    fn progress_reporter(&self, id: TaskId) -> ProgressReporter {
        let registry = self.inner.registry.clone();
        ProgressReporter::new(move |progress| {
            registry.record_progress(id, progress);
        })
    }
}
