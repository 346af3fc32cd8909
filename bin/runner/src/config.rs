//! Runner configuration.
//!
//! Loaded via the `config` crate from environment variables prefixed with
//! `AUTOFLOW`, using `__` as the nesting separator:
//!
//! ```text
//! AUTOFLOW_DATABASE_URL=postgres://localhost/autoflow
//! AUTOFLOW_ENGINE__MAX_CONCURRENCY=8
//! AUTOFLOW_ENGINE__RETRY__MAX_ATTEMPTS=3
//! ```

use autoflow_workflow::EngineConfig;
use serde::Deserialize;

/// Runner configuration composed from library configs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunnerConfig {
    /// PostgreSQL connection URL. Without it executions are kept in memory
    /// and `database` nodes are unavailable.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Scheduling limits and node defaults.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl RunnerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::with_prefix("AUTOFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_source(
        source: impl config::Source + Send + Sync + 'static,
    ) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> RunnerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RunnerConfig::from_source(
            config::Environment::with_prefix("AUTOFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars)),
        )
        .expect("config")
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = from_vars(&[]);
        assert!(config.database_url.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn nested_engine_settings() {
        let config = from_vars(&[
            ("AUTOFLOW_DATABASE_URL", "postgres://localhost/autoflow"),
            ("AUTOFLOW_ENGINE__MAX_CONCURRENCY", "8"),
            ("AUTOFLOW_ENGINE__NODE_TIMEOUT_MS", "500"),
        ]);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/autoflow")
        );
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.engine.node_timeout_ms, 500);
    }
}
