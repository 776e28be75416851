//! TaskRegistry - タスクレコードの唯一の保管場所
//!
//! # 設計
//! - 全フィールドの変更はこのモジュールの状態遷移メソッドを経由する（check-and-set）
//! - ロックは std Mutex、await をまたいで保持しない
//! - イベントはロック内で publish する（チャネル送信のみなのでブロックしない）。
//!   これで同一タスクのイベント順 = 遷移順になる
//! - 依存失敗の伝播は終端遷移と同じロック区間で即時に行う

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dependency::DependencyGraph;
use super::record::TaskRecord;
use super::retry::ExecutionPolicy;
use super::scheduler::{Candidate, Readiness, admission_order, readiness};
use crate::app::EventPublisher;
use crate::domain::{
    EventDetail, ExecutorKind, Priority, Progress, TaskError, TaskEvent, TaskId, TaskOutcome,
    TaskStatus,
};
use crate::exec::{Work, WorkResult};
use crate::ports::Clock;

/// Resolves once the task reaches a terminal state.
pub type Completion = watch::Receiver<Option<TaskOutcome>>;

/// A registration, after defaults have been applied.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub priority: Priority,
    pub dependencies: Vec<TaskId>,
    pub executor: ExecutorKind,
    pub policy: ExecutionPolicy,
    pub work: Work,
}

/// A task that just moved into Running, together with its execution slot.
#[derive(Debug)]
pub struct Admission {
    pub id: TaskId,
    pub name: String,
    pub executor: ExecutorKind,
    pub work: Work,
    pub policy: ExecutionPolicy,
    pub token: CancellationToken,
    pub permit: OwnedSemaphorePermit,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn total(&self) -> usize {
        self.pending + self.waiting + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> usize {
        self.pending + self.waiting + self.running
    }
}

struct Entry {
    record: TaskRecord,
    work: Work,
    token: CancellationToken,

    /// `execute` has been called; only submitted tasks are admitted.
    submitted: bool,

    done: watch::Sender<Option<TaskOutcome>>,
}

struct RegistryState {
    entries: HashMap<TaskId, Entry>,
    graph: DependencyGraph,
    next_seq: u64,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            graph: DependencyGraph::new(),
            next_seq: 0,
        }
    }

    fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.entries.get(&id).map(|e| e.record.status)
    }

    fn readiness_of(&self, record: &TaskRecord) -> Readiness {
        readiness(&record.dependencies, |dep| self.status_of(dep))
    }

    fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for entry in self.entries.values() {
            match entry.record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Waiting => counts.waiting += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Terminal transition without propagation.
    fn settle(
        &mut self,
        id: TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
        events: &EventPublisher,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if !entry.record.terminate(outcome.clone(), now) {
            return false;
        }
        let detail = match &outcome {
            TaskOutcome::Completed { .. } => EventDetail::Completed {
                attempts: entry.record.attempt_count,
            },
            TaskOutcome::Failed { error, attempts } => EventDetail::Failed {
                error: error.clone(),
                attempts: *attempts,
            },
            TaskOutcome::Cancelled => EventDetail::Cancelled,
        };
        info!(
            task_id = %id,
            name = %entry.record.name,
            status = %entry.record.status,
            attempts = entry.record.attempt_count,
            "task finished"
        );
        events.publish(event_for(&entry.record, detail, now));
        entry.done.send_replace(Some(outcome));
        true
    }

    /// Terminal transition, then eager failure of every transitive dependent.
    fn terminate(
        &mut self,
        id: TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
        events: &EventPublisher,
    ) -> bool {
        let unsuccessful = outcome.status().is_unsuccessful();
        if !self.settle(id, outcome, now, events) {
            return false;
        }
        if unsuccessful {
            self.propagate_failure(id, now, events);
        }
        true
    }

    fn propagate_failure(&mut self, root: TaskId, now: DateTime<Utc>, events: &EventPublisher) {
        let mut queue = VecDeque::from([root]);
        while let Some(failed) = queue.pop_front() {
            let Some(status) = self.status_of(failed) else {
                continue;
            };
            for dependent in self.graph.get_dependents(failed) {
                let attempts = match self.entries.get(&dependent) {
                    Some(e) if !e.record.is_terminal() => e.record.attempt_count,
                    _ => continue,
                };
                let outcome = TaskOutcome::Failed {
                    error: TaskError::Dependency {
                        dependency: failed,
                        status,
                    },
                    attempts,
                };
                if self.settle(dependent, outcome, now, events) {
                    debug!(task_id = %dependent, dependency = %failed, "dependency failure propagated");
                    queue.push_back(dependent);
                }
            }
        }
    }

    fn cancel(&mut self, id: TaskId, now: DateTime<Utc>, events: &EventPublisher) -> bool {
        let token = match self.entries.get(&id) {
            Some(e) if !e.record.is_terminal() => e.token.clone(),
            _ => return false,
        };
        if !self.terminate(id, TaskOutcome::Cancelled, now, events) {
            return false;
        }
        token.cancel();
        true
    }
}

fn event_for(record: &TaskRecord, detail: EventDetail, now: DateTime<Utc>) -> TaskEvent {
    TaskEvent::new(record.id, record.name.clone(), now, detail)
}

fn check_executor(kind: ExecutorKind, work: &Work) -> Result<(), TaskError> {
    match (kind, work.is_blocking()) {
        (ExecutorKind::Pooled, false) => Err(TaskError::validation(
            "pooled executor requires blocking work",
        )),
        (ExecutorKind::Cooperative, true) => Err(TaskError::validation(
            "cooperative executor requires async work",
        )),
        _ => Ok(()),
    }
}

/// Concurrent store of every known task.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
}

impl TaskRegistry {
    pub fn new(clock: Arc<dyn Clock>, events: EventPublisher) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            clock,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new task as Pending (no dependencies) or Waiting.
    ///
    /// Returns the status right after registration: Failed when a dependency
    /// had already failed or been cancelled.
    pub fn insert(&self, id: TaskId, task: NewTask) -> Result<TaskStatus, TaskError> {
        task.policy.validate()?;
        check_executor(task.executor, &task.work)?;

        let now = self.clock.now();
        let mut state = self.lock();

        let mut dependencies: Vec<TaskId> = Vec::with_capacity(task.dependencies.len());
        for dep in task.dependencies {
            if !state.entries.contains_key(&dep) {
                return Err(TaskError::validation(format!("unknown dependency {dep}")));
            }
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        let seq = state.next_seq;
        let status = if dependencies.is_empty() {
            TaskStatus::Pending
        } else {
            TaskStatus::Waiting
        };
        let record = TaskRecord {
            id,
            seq,
            name: task.name,
            description: task.description,
            tags: task.tags,
            metadata: task.metadata,
            priority: task.priority,
            dependencies,
            executor: task.executor,
            policy: task.policy,
            status,
            progress: Progress::default(),
            outcome: None,
            attempt_count: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        let readiness = state.readiness_of(&record);

        let (done, _) = watch::channel(None);
        match state.entries.entry(id) {
            MapEntry::Occupied(_) => {
                return Err(TaskError::validation(format!("duplicate task id {id}")));
            }
            MapEntry::Vacant(slot) => {
                self.events.publish(event_for(
                    &record,
                    EventDetail::Created {
                        priority: record.priority,
                        waiting: status == TaskStatus::Waiting,
                    },
                    now,
                ));
                slot.insert(Entry {
                    record,
                    work: task.work,
                    token: CancellationToken::new(),
                    submitted: false,
                    done,
                });
            }
        }
        state.next_seq += 1;
        for dep in state.entries[&id].record.dependencies.clone() {
            state.graph.add_dependency(id, dep);
        }
        debug!(task_id = %id, %status, "task registered");

        if let Readiness::Poisoned {
            dependency,
            status: dep_status,
        } = readiness
        {
            let outcome = TaskOutcome::Failed {
                error: TaskError::Dependency {
                    dependency,
                    status: dep_status,
                },
                attempts: 0,
            };
            state.terminate(id, outcome, now, &self.events);
            return Ok(TaskStatus::Failed);
        }
        Ok(status)
    }

    /// Mark a task as eligible for admission.
    pub fn submit(&self, id: TaskId) -> Result<Completion, TaskError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| TaskError::not_found(id))?;
        entry.submitted = true;
        Ok(entry.done.subscribe())
    }

    pub fn subscribe(&self, id: TaskId) -> Result<Completion, TaskError> {
        let state = self.lock();
        state
            .entries
            .get(&id)
            .map(|e| e.done.subscribe())
            .ok_or_else(|| TaskError::not_found(id))
    }

    /// One scheduling pass: move eligible tasks into Running, in
    /// (priority desc, arrival asc) order, while `acquire` hands out slots.
    pub fn admit<F>(&self, mut acquire: F) -> Vec<Admission>
    where
        F: FnMut(ExecutorKind) -> Option<OwnedSemaphorePermit>,
    {
        let now = self.clock.now();
        let mut state = self.lock();

        let candidates: Vec<Candidate> = state
            .entries
            .values()
            .filter(|e| e.submitted)
            .filter(|e| match e.record.status {
                TaskStatus::Pending => true,
                TaskStatus::Waiting => state.readiness_of(&e.record) == Readiness::Ready,
                _ => false,
            })
            .map(|e| Candidate {
                id: e.record.id,
                priority: e.record.priority,
                seq: e.record.seq,
            })
            .collect();

        let mut admitted = Vec::new();
        for candidate in admission_order(candidates) {
            let Some(entry) = state.entries.get_mut(&candidate.id) else {
                continue;
            };
            let Some(permit) = acquire(entry.record.executor) else {
                continue;
            };
            if !entry.record.transition(TaskStatus::Running, now) {
                continue;
            }
            entry.record.attempt_count = 1;
            debug!(task_id = %candidate.id, priority = ?candidate.priority, executor = %entry.record.executor, "task admitted");
            self.events.publish(event_for(
                &entry.record,
                EventDetail::Started { attempt: 1 },
                now,
            ));
            admitted.push(Admission {
                id: candidate.id,
                name: entry.record.name.clone(),
                executor: entry.record.executor,
                work: entry.work.clone(),
                policy: entry.record.policy.clone(),
                token: entry.token.clone(),
                permit,
            });
        }
        admitted
    }

    /// Running -> Running for the next attempt. Returns the new attempt
    /// number, or None when the task is no longer Running (e.g. cancelled)
    /// or its attempt budget is spent.
    pub fn begin_retry(&self, id: TaskId) -> Option<u32> {
        let now = self.clock.now();
        let mut state = self.lock();
        let entry = state.entries.get_mut(&id)?;
        if entry.record.status != TaskStatus::Running
            || entry.record.attempt_count >= entry.record.policy.max_attempts()
        {
            return None;
        }
        entry.record.transition(TaskStatus::Running, now);
        entry.record.attempt_count += 1;
        let attempt = entry.record.attempt_count;
        self.events
            .publish(event_for(&entry.record, EventDetail::Started { attempt }, now));
        Some(attempt)
    }

    /// Record the final result of a Running task. Returns false when the
    /// task had already left Running; the result is then discarded.
    pub fn finish(&self, id: TaskId, result: WorkResult) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(attempts) = state
            .entries
            .get(&id)
            .filter(|e| e.record.status == TaskStatus::Running)
            .map(|e| e.record.attempt_count)
        else {
            debug!(task_id = %id, "discarding result of a task that is no longer running");
            return false;
        };
        let outcome = match result {
            Ok(result) => TaskOutcome::Completed { result },
            Err(error) => {
                warn!(task_id = %id, attempts, %error, "task failed");
                TaskOutcome::Failed { error, attempts }
            }
        };
        state.terminate(id, outcome, now, &self.events)
    }

    /// Cancel a non-terminal task. Ok(false) when it is already terminal.
    pub fn cancel(&self, id: TaskId) -> Result<bool, TaskError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.entries.contains_key(&id) {
            return Err(TaskError::not_found(id));
        }
        Ok(state.cancel(id, now, &self.events))
    }

    /// Cancel every non-terminal task; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut live: Vec<(u64, TaskId)> = state
            .entries
            .values()
            .filter(|e| !e.record.is_terminal())
            .map(|e| (e.record.seq, e.record.id))
            .collect();
        live.sort();
        let mut cancelled = 0;
        for (_, id) in live {
            // dependents may already have been failed by an earlier cancel
            if state.cancel(id, now, &self.events) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Merge a progress report into a Running task. Ignored otherwise.
    pub fn record_progress(&self, id: TaskId, progress: Progress) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return false;
        };
        if entry.record.status != TaskStatus::Running {
            return false;
        }
        entry.record.progress.advance(progress);
        let progress = entry.record.progress.clone();
        self.events
            .publish(event_for(&entry.record, EventDetail::Progress { progress }, now));
        true
    }

    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.lock().entries.get(&id).map(|e| e.record.clone())
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().status_of(id)
    }

    /// Records in arrival order, optionally filtered by status.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let state = self.lock();
        let mut records: Vec<TaskRecord> = state
            .entries
            .values()
            .filter(|e| status.is_none_or(|s| e.record.status == s))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub fn counts(&self) -> TaskCounts {
        self.lock().counts()
    }

    /// Drop terminal tasks completed at or before `cutoff` that no live task
    /// depends on.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Vec<TaskId> {
        let mut state = self.lock();
        let expired: Vec<TaskId> = state
            .entries
            .values()
            .filter(|e| e.record.completed_at.is_some_and(|at| at <= cutoff))
            .map(|e| e.record.id)
            .collect();
        state.remove_settled(expired)
    }

    /// Drop the given tasks. Ids that are unknown, not terminal, or still
    /// depended on by a live task are kept.
    pub fn purge(&self, ids: &[TaskId]) -> Vec<TaskId> {
        self.lock().remove_settled(ids.iter().copied())
    }
}

impl RegistryState {
    fn remove_settled(&mut self, ids: impl IntoIterator<Item = TaskId>) -> Vec<TaskId> {
        let removable: Vec<TaskId> = ids
            .into_iter()
            .filter(|id| self.entries.get(id).is_some_and(|e| e.record.is_terminal()))
            .filter(|id| {
                self.graph
                    .get_dependents(*id)
                    .iter()
                    .all(|d| self.status_of(*d).is_none_or(TaskStatus::is_terminal))
            })
            .collect();
        for id in &removable {
            self.entries.remove(id);
            self.graph.remove_task(*id);
        }
        if !removable.is_empty() {
            debug!(purged = removable.len(), "terminal tasks purged");
        }
        removable
    }
}

/// Wait until the completion signal carries an outcome.
pub async fn wait_outcome(id: TaskId, mut completion: Completion) -> Result<TaskOutcome, TaskError> {
    match completion.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().ok_or_else(|| TaskError::not_found(id)),
        Err(_) => Err(TaskError::not_found(id)),
    }
}
