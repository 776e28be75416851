//! FlowManager - 長時間ジョブ（フロー）の同時実行管理
//!
//! # 設計
//! - 1 フロー = 1 タスク（cooperative executor で FlowRunner を実行）
//! - 同時実行フロー数の上限は start_flow 時にだけ判定（TaskManager の上限とは独立）
//! - フローの状態はタスクを読み取って写すだけ（refresh）
//! - 終端から保持期間を過ぎたフローは cleanup で削除
//!
//! ロック順序: flows → registry（逆順は取らない）

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::builder::{BuildError, validate_flows};
use super::gc_loop::CleanupLoop;
use super::manager::TaskManager;
use super::spec::TaskSpec;
use super::status::FlowView;
use crate::config::FlowConfig;
use crate::domain::{FlowId, FlowRecord, FlowStatus, Priority, Progress, TaskError, TaskId};
use crate::exec::Work;
use crate::ports::{FlowInput, FlowRunner, PriorResult};

/// Input of `start_flow`.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    input: serde_json::Value,
    config: serde_json::Value,
    priority: Priority,
    tags: Vec<String>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl FlowRequest {
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            input,
            config: serde_json::Value::Null,
            priority: Priority::default(),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Opaque configuration snapshot handed to the runner.
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

struct Inner {
    tasks: TaskManager,
    runner: Arc<dyn FlowRunner>,
    flows: Mutex<HashMap<FlowId, FlowRecord>>,
    config: FlowConfig,
}

#[derive(Clone)]
pub struct FlowManager {
    inner: Arc<Inner>,
}

impl FlowManager {
    /// Fails with `InvalidConfig` for a zero flow cap or cleanup interval.
    pub fn new(
        tasks: TaskManager,
        runner: Arc<dyn FlowRunner>,
        config: FlowConfig,
    ) -> Result<Self, BuildError> {
        validate_flows(&config)?;
        Ok(Self {
            inner: Arc::new(Inner {
                tasks,
                runner,
                flows: Mutex::new(HashMap::new()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FlowId, FlowRecord>> {
        self.inner
            .flows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy task state into every flow that has not settled yet.
    fn refresh(&self, flows: &mut HashMap<FlowId, FlowRecord>) {
        for flow in flows.values_mut().filter(|f| f.status.is_active()) {
            if let Some(task) = self.inner.tasks.get_task(flow.task_id) {
                flow.sync_from_task(&task);
            }
        }
    }

    /// Start a new flow.
    ///
    /// Fails with `ResourceExhausted` when `max_concurrent_flows` flows are
    /// already Pending or Running; no task is registered in that case.
    pub async fn start_flow(&self, request: FlowRequest) -> Result<FlowId, TaskError> {
        self.start(request, None).await
    }

    /// Start a flow that continues `previous`, which must be Completed. The
    /// runner receives the previous result alongside the new input.
    pub async fn start_continuous_flow(
        &self,
        previous: FlowId,
        request: FlowRequest,
    ) -> Result<FlowId, TaskError> {
        self.start(request, Some(previous)).await
    }

    async fn start(
        &self,
        request: FlowRequest,
        previous: Option<FlowId>,
    ) -> Result<FlowId, TaskError> {
        let ids = self.inner.tasks.id_generator();
        let flow_id = ids.generate_flow_id();

        let task_id = {
            let mut flows = self.lock();
            self.refresh(&mut flows);

            let prior = match previous {
                Some(prev_id) => {
                    let prev = flows
                        .get(&prev_id)
                        .ok_or_else(|| TaskError::not_found(prev_id))?;
                    match (&prev.status, &prev.result) {
                        (FlowStatus::Completed, Some(result)) => Some(PriorResult {
                            flow_id: prev_id,
                            result: result.clone(),
                        }),
                        (status, _) => {
                            return Err(TaskError::validation(format!(
                                "{prev_id} is {status:?}, only completed flows can be continued"
                            )));
                        }
                    }
                }
                None => None,
            };

            let active = flows.values().filter(|f| f.status.is_active()).count();
            let limit = self.inner.config.max_concurrent_flows;
            if active >= limit {
                debug!(active, limit, "flow admission refused");
                return Err(TaskError::ResourceExhausted(format!(
                    "{active} of {limit} concurrent flows in use"
                )));
            }

            let input = FlowInput {
                flow_id,
                input: request.input.clone(),
                config: request.config.clone(),
                previous: prior,
            };
            let runner = self.inner.runner.clone();
            let work = Work::from_async(move |ctx| {
                let runner = runner.clone();
                let input = input.clone();
                async move { runner.run(input, ctx).await }
            });

            let mut spec = TaskSpec::new(format!("flow {flow_id}"), work)
                .priority(request.priority)
                .metadata("flow_id", serde_json::json!(flow_id.to_string()));
            if let Some(prev_id) = previous {
                spec = spec.metadata("continues", serde_json::json!(prev_id.to_string()));
            }
            for tag in &request.tags {
                spec = spec.tag(tag.clone());
            }
            let task_id = self.inner.tasks.register(spec)?;

            let created_at = self
                .inner
                .tasks
                .get_task(task_id)
                .map(|t| t.created_at)
                .unwrap_or_else(|| self.inner.tasks.clock().now());
            flows.insert(
                flow_id,
                FlowRecord {
                    flow_id,
                    task_id,
                    parent: previous,
                    input: request.input,
                    config: request.config,
                    priority: request.priority,
                    tags: request.tags,
                    metadata: request.metadata,
                    status: FlowStatus::Pending,
                    progress: Progress::default(),
                    result: None,
                    error: None,
                    created_at,
                    started_at: None,
                    completed_at: None,
                },
            );
            task_id
        };

        info!(%flow_id, %task_id, continues = ?previous, "flow started");
        self.inner.tasks.execute(task_id, false).await?;
        Ok(flow_id)
    }

    /// Current record of one flow.
    pub fn get_flow(&self, flow_id: FlowId) -> Option<FlowRecord> {
        let mut flows = self.lock();
        self.refresh(&mut flows);
        flows.get(&flow_id).cloned()
    }

    pub fn get_flow_status(&self, flow_id: FlowId) -> Option<FlowView> {
        self.get_flow(flow_id).as_ref().map(FlowView::from)
    }

    /// Present only for Completed flows.
    pub fn get_flow_result(&self, flow_id: FlowId) -> Option<serde_json::Value> {
        self.get_flow(flow_id).and_then(|f| f.result)
    }

    /// All live flows, oldest first. Runs `cleanup` first.
    pub fn get_all_flows(&self, status: Option<FlowStatus>) -> Vec<FlowView> {
        self.cleanup();
        let flows = self.lock();
        let mut views: Vec<FlowView> = flows
            .values()
            .filter(|f| status.is_none_or(|s| f.status == s))
            .map(FlowView::from)
            .collect();
        views.sort_by_key(|v| (v.created_at, v.flow_id));
        views
    }

    pub fn cancel_flow(&self, flow_id: FlowId) -> Result<bool, TaskError> {
        let task_id = self
            .lock()
            .get(&flow_id)
            .map(|f| f.task_id)
            .ok_or_else(|| TaskError::not_found(flow_id))?;
        self.inner.tasks.cancel(task_id)
    }

    /// Wait until the flow is terminal.
    pub async fn wait_flow(&self, flow_id: FlowId) -> Result<FlowView, TaskError> {
        let task_id = self
            .lock()
            .get(&flow_id)
            .map(|f| f.task_id)
            .ok_or_else(|| TaskError::not_found(flow_id))?;
        self.inner.tasks.wait(task_id).await?;
        self.get_flow_status(flow_id)
            .ok_or_else(|| TaskError::not_found(flow_id))
    }

    /// Evict flows terminal for longer than the retention window, together
    /// with the tasks behind them. Returns the number of evicted flows.
    ///
    /// Tasks registered directly on the `TaskManager` are left alone.
    pub fn cleanup(&self) -> usize {
        let now = self.inner.tasks.clock().now();
        let retention = self.inner.config.retention();
        let window = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);

        let evicted: Vec<TaskId> = {
            let mut flows = self.lock();
            self.refresh(&mut flows);
            let expired: Vec<FlowId> = flows
                .values()
                .filter(|f| f.is_expired(now, window))
                .map(|f| f.flow_id)
                .collect();
            expired
                .iter()
                .filter_map(|id| flows.remove(id))
                .map(|f| f.task_id)
                .collect()
        };
        let purged = self.inner.tasks.purge(&evicted);
        let evicted = evicted.len();
        if evicted > 0 || purged > 0 {
            info!(evicted, purged, "flow cleanup");
        }
        evicted
    }

    /// Run `cleanup` every `cleanup_interval` until the returned handle is
    /// shut down.
    pub fn spawn_cleanup_loop(&self) -> CleanupLoop {
        CleanupLoop::spawn(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::config::EngineConfig;
    use crate::exec::TaskContext;
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use crate::domain::TaskStatus;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::time::Duration;

    /// Echoes its input; blocks until cancelled when the input says so.
    struct EchoRunner;

    #[async_trait]
    impl FlowRunner for EchoRunner {
        async fn run(
            &self,
            input: FlowInput,
            ctx: TaskContext,
        ) -> Result<serde_json::Value, TaskError> {
            ctx.report_phase("planning", 0.5, None);
            if input.input["hold"] == true {
                ctx.cancelled().await;
                ctx.checkpoint()?;
            }
            Ok(serde_json::json!({
                "input": input.input,
                "previous": input.previous.map(|p| p.result),
            }))
        }
    }

    fn flows(max: usize) -> (FlowManager, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let mut config = EngineConfig::default();
        config.executors.pool_size = 1;
        config.flows.max_concurrent_flows = max;
        config.flows.retention_secs = 60;
        let tasks = EngineBuilder::new()
            .config(config.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        (
            FlowManager::new(tasks, Arc::new(EchoRunner), config.flows).unwrap(),
            clock,
        )
    }

    #[tokio::test]
    async fn flow_runs_to_completion() {
        let (fm, _) = flows(2);
        let id = fm
            .start_flow(FlowRequest::new(serde_json::json!("rust async")))
            .await
            .unwrap();

        let view = fm.wait_flow(id).await.unwrap();
        assert_eq!(view.status, FlowStatus::Completed);
        assert_eq!(view.progress.fraction, 1.0);
        assert_eq!(
            fm.get_flow_result(id).unwrap()["input"],
            serde_json::json!("rust async")
        );
    }

    #[tokio::test]
    async fn cap_refuses_without_registering_a_task() {
        let (fm, _) = flows(1);
        let held = fm
            .start_flow(FlowRequest::new(serde_json::json!({"hold": true})))
            .await
            .unwrap();
        let tasks_before = fm.inner.tasks.counts().total();

        let refused = fm
            .start_flow(FlowRequest::new(serde_json::json!("second")))
            .await;
        assert!(matches!(refused, Err(TaskError::ResourceExhausted(_))));
        assert_eq!(fm.inner.tasks.counts().total(), tasks_before);

        assert_eq!(fm.cancel_flow(held), Ok(true));
        assert!(
            fm.start_flow(FlowRequest::new(serde_json::json!("third")))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn continuation_sees_previous_result() {
        let (fm, _) = flows(2);
        let first = fm
            .start_flow(FlowRequest::new(serde_json::json!("part one")))
            .await
            .unwrap();
        fm.wait_flow(first).await.unwrap();

        let second = fm
            .start_continuous_flow(first, FlowRequest::new(serde_json::json!("part two")))
            .await
            .unwrap();
        fm.wait_flow(second).await.unwrap();

        let result = fm.get_flow_result(second).unwrap();
        assert_eq!(result["previous"]["input"], serde_json::json!("part one"));
        assert_eq!(fm.get_flow(second).unwrap().parent, Some(first));
    }

    #[tokio::test]
    async fn continuing_an_unfinished_flow_is_rejected() {
        let (fm, _) = flows(2);
        let held = fm
            .start_flow(FlowRequest::new(serde_json::json!({"hold": true})))
            .await
            .unwrap();

        assert!(matches!(
            fm.start_continuous_flow(held, FlowRequest::new(serde_json::json!("next")))
                .await,
            Err(TaskError::Validation(_))
        ));
        fm.cancel_flow(held).unwrap();
    }

    #[tokio::test]
    async fn cleanup_evicts_after_retention() {
        let (fm, clock) = flows(2);
        let id = fm
            .start_flow(FlowRequest::new(serde_json::json!("short")))
            .await
            .unwrap();
        fm.wait_flow(id).await.unwrap();

        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(fm.get_all_flows(None).len(), 1);

        clock.advance(chrono::Duration::seconds(1));
        assert!(fm.get_all_flows(None).is_empty());
        assert!(fm.get_flow(id).is_none());
        assert_eq!(fm.inner.tasks.counts().total(), 0);
    }

    #[tokio::test]
    async fn filter_by_status() {
        let (fm, _) = flows(3);
        let done = fm
            .start_flow(FlowRequest::new(serde_json::json!("a")))
            .await
            .unwrap();
        fm.wait_flow(done).await.unwrap();
        let held = fm
            .start_flow(FlowRequest::new(serde_json::json!({"hold": true})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let completed = fm.get_all_flows(Some(FlowStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].flow_id, done);

        fm.cancel_flow(held).unwrap();
        let cancelled = fm.get_all_flows(Some(FlowStatus::Cancelled));
        assert_eq!(cancelled.len(), 1);
    }

    #[tokio::test]
    async fn unknown_flow_operations() {
        let (fm, _) = flows(1);
        let bogus = fm.inner.tasks.id_generator().generate_flow_id();
        assert!(fm.get_flow_status(bogus).is_none());
        assert!(matches!(
            fm.cancel_flow(bogus),
            Err(TaskError::NotFound(_))
        ));
        assert!(matches!(
            fm.start_continuous_flow(bogus, FlowRequest::new(serde_json::json!(1)))
                .await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_leaves_directly_registered_tasks_alone() {
        let (fm, clock) = flows(2);
        let tasks = fm.inner.tasks.clone();
        let direct = tasks
            .register(TaskSpec::new(
                "direct",
                Work::from_async(|_ctx| async { Ok::<_, TaskError>(7) }),
            ))
            .unwrap();
        tasks.execute(direct, true).await.unwrap();
        let flow = fm
            .start_flow(FlowRequest::new(serde_json::json!("owned")))
            .await
            .unwrap();
        let flow_task = fm.get_flow(flow).unwrap().task_id;
        fm.wait_flow(flow).await.unwrap();

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(fm.cleanup(), 1);

        assert!(tasks.get_task(flow_task).is_none());
        assert_eq!(tasks.get_status(direct), Some(TaskStatus::Completed));
        assert_eq!(tasks.get_result(direct), Some(serde_json::json!(7)));
    }

    #[rstest]
    #[case::zero_cap(0, 300)]
    #[case::zero_interval(5, 0)]
    #[tokio::test]
    async fn rejects_unusable_flow_config(#[case] max_flows: usize, #[case] interval_secs: u64) {
        let tasks = EngineBuilder::new().build().unwrap();
        let config = FlowConfig {
            max_concurrent_flows: max_flows,
            cleanup_interval_secs: interval_secs,
            ..FlowConfig::default()
        };
        assert!(matches!(
            FlowManager::new(tasks, Arc::new(EchoRunner), config),
            Err(BuildError::InvalidConfig(_))
        ));
    }
}
