//! SQL statements run through a host-supplied [`QueryRunner`].

use super::primary_output;
use crate::error::ExecutorError;
use crate::node::NodeConfig;
use crate::registry::{NodeExecutor, NodeInvocation, NodeOutputs};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runs queries for `database` nodes.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Runs `query` with positional parameters and returns one JSON value
    /// per row.
    async fn query(&self, query: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>, ExecutorError>;
}

/// Runs the configured query with the `params` input.
///
/// `params` may be an array of positional parameters or a single value;
/// absent means no parameters.
#[derive(Clone)]
pub struct DatabaseExecutor {
    runner: Arc<dyn QueryRunner>,
}

impl DatabaseExecutor {
    #[must_use]
    pub fn new(runner: Arc<dyn QueryRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NodeExecutor for DatabaseExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Database(config) = &invocation.node.config else {
            return Err(ExecutorError::InvalidInput(format!(
                "expected database configuration, got {}",
                invocation.node.kind()
            )));
        };
        let params = match invocation.input("params") {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        };

        let rows = tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => return Err(ExecutorError::Cancelled),
            rows = self.runner.query(&config.query, &params) => rows?,
        };
        Ok(BTreeMap::from([(
            primary_output(&invocation.node),
            JsonValue::Array(rows),
        )]))
    }
}
