//! Engine configuration.
//!
//! ```toml
//! [executors]
//! pool_size = 4            # 0 = available parallelism
//! async_concurrency = 64
//!
//! [retry]
//! default_retry_delay_ms = 1000
//! backoff_multiplier = 2.0
//!
//! [flows]
//! max_concurrent_flows = 5
//! retention_secs = 3600
//! cleanup_interval_secs = 300
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub executors: ExecutorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub flows: FlowConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads of the pooled executor; 0 means available parallelism.
    #[serde(default)]
    pub pool_size: usize,

    /// Admission semaphore size of the cooperative executor.
    #[serde(default = "default_async_concurrency")]
    pub async_concurrency: usize,
}

impl ExecutorConfig {
    pub fn resolved_pool_size(&self) -> usize {
        if self.pool_size > 0 {
            self.pool_size
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 0,
            async_concurrency: default_async_concurrency(),
        }
    }
}

fn default_async_concurrency() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base backoff when a registration does not give one.
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.default_retry_delay_ms),
            self.backoff_multiplier,
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_max_concurrent_flows")]
    pub max_concurrent_flows: usize,

    /// How long terminal flows are kept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl FlowConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_flows: default_max_concurrent_flows(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_max_concurrent_flows() -> usize {
    5
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.executors.async_concurrency, 64);
        assert_eq!(config.retry.default_retry_delay_ms, 1000);
        assert_eq!(config.flows.max_concurrent_flows, 5);
        assert_eq!(config.flows.retention(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_sections_are_merged_with_defaults() {
        let toml_str = r#"
            [executors]
            pool_size = 3

            [flows]
            max_concurrent_flows = 2
        "#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.executors.resolved_pool_size(), 3);
        assert_eq!(config.executors.async_concurrency, 64);
        assert_eq!(config.flows.max_concurrent_flows, 2);
        assert_eq!(config.flows.cleanup_interval_secs, 300);
    }

    #[test]
    fn zero_pool_size_resolves_to_parallelism() {
        let config = ExecutorConfig::default();
        assert!(config.resolved_pool_size() >= 1);
    }

    #[test]
    fn retry_section_builds_policy() {
        let config = EngineConfig::from_toml_str(
            "[retry]\ndefault_retry_delay_ms = 250\nbackoff_multiplier = 3.0\n",
        )
        .unwrap();
        let policy = config.retry.policy();
        assert_eq!(policy.next_delay(2), Duration::from_millis(750));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_toml_str("[flows]\nmax_concurrent_flows = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/loom.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
