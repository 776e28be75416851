//! TaskSpec - タスク登録の入力
//!
//! ```ignore
//! let id = manager.register(
//!     TaskSpec::new("fetch", Work::from_async(|ctx| async move { fetch(ctx).await }))
//!         .priority(Priority::High)
//!         .depends_on(parent)
//!         .max_retries(2)
//!         .timeout(Duration::from_secs(30)),
//! )?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::{ExecutorKind, Priority, TaskId};
use crate::exec::Work;

/// Everything needed to register one task. Unset fields take engine defaults.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub(crate) name: String,
    pub(crate) work: Work,
    pub(crate) description: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) metadata: BTreeMap<String, serde_json::Value>,
    pub(crate) priority: Priority,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) executor: Option<ExecutorKind>,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, work: Work) -> Self {
        Self {
            name: name.into(),
            work,
            description: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            priority: Priority::default(),
            dependencies: Vec::new(),
            executor: None,
            max_retries: 0,
            retry_delay: None,
            timeout: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
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

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    /// Override the executor chosen from the work kind
    /// (blocking -> pooled, async -> cooperative).
    pub fn executor(mut self, executor: ExecutorKind) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base backoff; retry n waits `retry_delay * multiplier^(n-1)`.
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = Some(retry_delay);
        self
    }

    /// Per-attempt deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn default_executor(&self) -> ExecutorKind {
        self.executor.unwrap_or(if self.work.is_blocking() {
            ExecutorKind::Pooled
        } else {
            ExecutorKind::Cooperative
        })
    }
}
