//! End-to-end scenarios across registry, scheduler, executors and flows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use loom_core::app::{EngineBuilder, FlowManager, FlowRequest, TaskManager, TaskSpec};
use loom_core::config::EngineConfig;
use loom_core::domain::{ExecutorKind, FlowStatus, Priority, TaskError, TaskStatus};
use loom_core::exec::{TaskContext, Work};
use loom_core::ports::{FixedClock, FlowInput, FlowRunner};
use tokio::time::Instant;

fn engine(pool_size: usize) -> TaskManager {
    let mut config = EngineConfig::default();
    config.executors.pool_size = pool_size;
    EngineBuilder::new().config(config).build().unwrap()
}

/// Blocking work waits on this until the test opens it.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn wait(&self) {
        let (open, cv) = &*self.0;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
    }

    fn open(&self) {
        let (open, cv) = &*self.0;
        *open.lock().unwrap() = true;
        cv.notify_all();
    }
}

fn recorder(order: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Work {
    let order = order.clone();
    Work::from_blocking(move |_ctx| {
        order.lock().unwrap().push(name);
        Ok::<_, TaskError>(name)
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dependency_runs_before_higher_priority_dependent() {
    let m = engine(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = m
        .register(TaskSpec::new("A", recorder(&order, "A")).priority(Priority::Normal))
        .unwrap();
    let b = m
        .register(
            TaskSpec::new("B", recorder(&order, "B"))
                .priority(Priority::High)
                .depends_on(a),
        )
        .unwrap();
    assert_eq!(m.get_status(b), Some(TaskStatus::Waiting));

    m.execute(b, false).await.unwrap();
    m.execute(a, false).await.unwrap();
    m.wait(b).await.unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["A", "B"]);
    let (a, b) = (m.get_task(a).unwrap(), m.get_task(b).unwrap());
    assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scarce_slots_admit_higher_priority_first() {
    let m = engine(1);
    let gate = Gate::default();
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = gate.clone();
    let blocker = m
        .register(TaskSpec::new(
            "blocker",
            Work::from_blocking(move |_ctx| {
                held.wait();
                Ok::<_, TaskError>(())
            }),
        ))
        .unwrap();
    m.execute(blocker, false).await.unwrap();

    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("high", Priority::High),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
    ] {
        let id = m
            .register(TaskSpec::new(name, recorder(&order, name)).priority(priority))
            .unwrap();
        m.execute(id, false).await.unwrap();
        ids.push(id);
    }
    assert_eq!(m.counts().pending, 4);

    gate.open();
    for id in ids {
        m.wait(id).await.unwrap();
    }
    assert_eq!(
        *order.lock().unwrap(),
        vec!["critical", "high", "normal", "low"]
    );
}

#[tokio::test(start_paused = true)]
async fn always_failing_task_is_attempted_max_retries_plus_one() {
    let m = engine(1);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let seen = starts.clone();
    let id = m
        .register(
            TaskSpec::new(
                "always fails",
                Work::from_async(move |_ctx| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(Instant::now());
                        Err::<(), _>("upstream unavailable")
                    }
                }),
            )
            .max_retries(2)
            .retry_delay(Duration::from_secs(1)),
        )
        .unwrap();

    let err = m.execute(id, true).await.unwrap_err();
    assert_eq!(err, TaskError::execution("upstream unavailable"));

    let record = m.get_task(id).unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.attempt_count, 3);

    let starts = starts.lock().unwrap();
    let gaps: Vec<u64> = starts
        .windows(2)
        .map(|w| (w[1] - w[0]).as_millis() as u64)
        .collect();
    assert_eq!(gaps.len(), 2);
    assert!((1000..1050).contains(&gaps[0]), "{gaps:?}");
    assert!((2000..2050).contains(&gaps[1]), "{gaps:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_executor_respects_pool_size() {
    let m = engine(2);
    let running = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for i in 0..8 {
        let running = running.clone();
        let high_water = high_water.clone();
        let work = Work::from_blocking(move |_ctx| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, TaskError>(i)
        });
        let id = m.register(TaskSpec::new(format!("job-{i}"), work)).unwrap();
        m.execute(id, false).await.unwrap();
        ids.push(id);
    }
    for id in ids {
        m.wait(id).await.unwrap();
    }

    assert_eq!(high_water.load(Ordering::SeqCst), 2);
    assert_eq!(m.counts().completed, 8);
}

#[tokio::test]
async fn failed_dependency_fails_whole_chain() {
    let m = engine(1);
    let a = m
        .register(TaskSpec::new(
            "a",
            Work::from_async(|_ctx| async { Err::<(), _>("boom") }),
        ))
        .unwrap();
    let b = m
        .register(TaskSpec::new("b", Work::from_async(|_ctx| async { Ok::<_, TaskError>(1) })).depends_on(a))
        .unwrap();
    let c = m
        .register(TaskSpec::new("c", Work::from_async(|_ctx| async { Ok::<_, TaskError>(2) })).depends_on(b))
        .unwrap();

    m.execute(c, false).await.unwrap();
    m.execute(b, false).await.unwrap();
    assert!(m.execute(a, true).await.is_err());

    assert_eq!(
        m.get_error(b),
        Some(TaskError::Dependency {
            dependency: a,
            status: TaskStatus::Failed
        })
    );
    assert_eq!(
        m.get_error(c),
        Some(TaskError::Dependency {
            dependency: b,
            status: TaskStatus::Failed
        })
    );
    assert_eq!(m.get_task(b).unwrap().attempt_count, 0);
}

#[tokio::test]
async fn cancelling_pending_task_is_immediate_and_has_no_result() {
    let m = engine(1);
    let id = m
        .register(
            TaskSpec::new("pending", Work::from_blocking(|_ctx| Ok::<_, TaskError>(1)))
                .executor(ExecutorKind::Sequential),
        )
        .unwrap();

    assert_eq!(m.cancel(id), Ok(true));
    assert_eq!(m.get_status(id), Some(TaskStatus::Cancelled));
    assert_eq!(m.get_result(id), None);
}

struct Research;

#[async_trait]
impl FlowRunner for Research {
    async fn run(&self, input: FlowInput, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
        ctx.report_phase("planning", 0.3, None);
        if input.input["wait_for_cancel"] == true {
            ctx.cancelled().await;
            ctx.checkpoint()?;
        }
        ctx.report_phase("writing", 0.9, Some("drafting"));
        Ok(serde_json::json!({ "report": input.input }))
    }
}

fn flow_engine(max_flows: usize, retention_secs: u64) -> (FlowManager, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
    let mut config = EngineConfig::default();
    config.executors.pool_size = 1;
    config.flows.max_concurrent_flows = max_flows;
    config.flows.retention_secs = retention_secs;
    let tasks = EngineBuilder::new()
        .config(config.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    (
        FlowManager::new(tasks, Arc::new(Research), config.flows).unwrap(),
        clock,
    )
}

#[tokio::test]
async fn flow_cap_refuses_and_registers_nothing() {
    let (flows, _) = flow_engine(2, 3600);
    let mut running = Vec::new();
    for _ in 0..2 {
        let id = flows
            .start_flow(FlowRequest::new(serde_json::json!({ "wait_for_cancel": true })))
            .await
            .unwrap();
        running.push(id);
    }
    let before = flows.get_all_flows(None).len();

    let refused = flows.start_flow(FlowRequest::new(serde_json::json!("third"))).await;
    assert!(matches!(refused, Err(TaskError::ResourceExhausted(_))));
    assert_eq!(flows.get_all_flows(None).len(), before);

    for id in running {
        flows.cancel_flow(id).unwrap();
        assert_eq!(
            flows.get_flow_status(id).unwrap().status,
            FlowStatus::Cancelled
        );
    }
}

#[tokio::test]
async fn completed_flow_disappears_after_retention() {
    let (flows, clock) = flow_engine(5, 600);
    let id = flows
        .start_flow(
            FlowRequest::new(serde_json::json!("tokio internals"))
                .config(serde_json::json!({ "depth": 2 }))
                .metadata("requested_by", serde_json::json!("scenario")),
        )
        .await
        .unwrap();

    let view = flows.wait_flow(id).await.unwrap();
    assert_eq!(view.status, FlowStatus::Completed);
    assert_eq!(view.config["depth"], 2);
    assert_eq!(view.metadata["requested_by"], "scenario");
    assert_eq!(view.progress.phase.as_deref(), Some("writing"));

    clock.advance(chrono::Duration::seconds(300));
    assert_eq!(flows.cleanup(), 0);
    assert_eq!(flows.get_all_flows(None).len(), 1);

    clock.advance(chrono::Duration::seconds(300));
    assert_eq!(flows.cleanup(), 1);
    assert!(flows.get_all_flows(None).is_empty());
}
