//! Engine configuration.
//!
//! Deserializable so a host can load it with the `config` crate; every field
//! has a default.

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Per-execution scheduling limits and node defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Maximum in-flight node invocations per execution.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for one node invocation, in milliseconds.
    /// Nodes may override it with their own `timeout_ms`.
    #[serde(default = "default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// Retry policy for nodes that do not declare one.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_node_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            node_timeout_ms: default_node_timeout_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the default node timeout.
    #[must_use]
    pub fn with_node_timeout_ms(mut self, node_timeout_ms: u64) -> Self {
        self.node_timeout_ms = node_timeout_ms;
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The concurrency limit, never less than one.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// The default node timeout.
    #[must_use]
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}
