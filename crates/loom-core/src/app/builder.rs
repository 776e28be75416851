//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定値を検証し、不正なら BuildError を返す
//! - 実行中に「スロット 0 で永遠に進まない」状態を作らない
//!
//! build() はイベント配送ループを起動するため、tokio ランタイム内で呼ぶこと。

use std::sync::Arc;

use tracing::info;

use super::manager::{Executors, ManagerParts, TaskManager};
use super::publisher::EventPublisher;
use crate::config::{EngineConfig, FlowConfig};
use crate::domain::{Decider, DefaultDecider};
use crate::exec::{CooperativeExecutor, PooledExecutor, SequentialExecutor};
use crate::impls::NoopEventSink;
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, UlidGenerator};

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let manager = EngineBuilder::new()
///     .config(EngineConfig::load("loom.toml")?)
///     .event_sink(Arc::new(TracingEventSink))
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sink: Option<Arc<dyn EventSink>>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            ids: None,
            sink: None,
            decider: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` over the engine clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to `NoopEventSink`.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Defaults to `DefaultDecider`.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        let config = &self.config;
        if config.executors.async_concurrency == 0 {
            return Err(BuildError::InvalidConfig(
                "executors.async_concurrency must be at least 1".into(),
            ));
        }
        let multiplier = config.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BuildError::InvalidConfig(format!(
                "retry.backoff_multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        validate_flows(&config.flows)
    }

    pub fn build(self) -> Result<TaskManager, BuildError> {
        self.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopEventSink));
        let decider = self.decider.unwrap_or_else(|| Arc::new(DefaultDecider));

        let pool_size = self.config.executors.resolved_pool_size();
        let async_concurrency = self.config.executors.async_concurrency;
        let executors = Executors {
            sequential: Arc::new(SequentialExecutor::new()),
            pooled: Arc::new(PooledExecutor::new(pool_size)?),
            cooperative: Arc::new(CooperativeExecutor::new(async_concurrency)),
        };

        let (events, _delivery) = EventPublisher::spawn(sink);
        info!(pool_size, async_concurrency, "engine started");

        Ok(TaskManager::new(ManagerParts {
            executors,
            decider,
            ids,
            clock,
            events,
            retry_defaults: self.config.retry.policy(),
        }))
    }
}

/// FlowManager も同じ検証を通す
pub(crate) fn validate_flows(flows: &FlowConfig) -> Result<(), BuildError> {
    if flows.max_concurrent_flows == 0 {
        return Err(BuildError::InvalidConfig(
            "flows.max_concurrent_flows must be at least 1".into(),
        ));
    }
    if flows.cleanup_interval_secs == 0 {
        return Err(BuildError::InvalidConfig(
            "flows.cleanup_interval_secs must be at least 1".into(),
        ));
    }
    Ok(())
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
