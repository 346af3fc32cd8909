//! Node executor registry.
//!
//! Dispatch is keyed by [`NodeKind`]: the set of kinds is closed, but the
//! behavior behind each kind is whatever executor is registered for it, so
//! new behaviors never touch the scheduler.

use crate::context::ContextView;
use crate::error::{ExecutorError, NodeError};
use crate::node::{Node, NodeKind};
use crate::nodes::{
    ActionExecutor, ConditionExecutor, DatabaseExecutor, EmailExecutor, EntryExecutor,
    HttpExecutor, Mailer, QueryRunner, TransformExecutor,
};
use async_trait::async_trait;
use autoflow_core::ExecutionId;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Values keyed by port name.
pub type NodeOutputs = BTreeMap<String, JsonValue>;

/// Everything an executor gets for one attempt at one node.
#[derive(Debug, Clone)]
pub struct NodeInvocation {
    pub execution_id: ExecutionId,
    pub node: Arc<Node>,
    /// Resolved inputs keyed by input port name.
    pub inputs: BTreeMap<String, JsonValue>,
    /// The run's input data.
    pub input_data: Arc<JsonValue>,
    /// Read access to ancestors' outputs.
    pub context: ContextView,
    /// Fires when the run is cancelled.
    pub cancel: CancellationToken,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl NodeInvocation {
    /// Returns a resolved input by port name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&JsonValue> {
        self.inputs.get(name)
    }

    /// Returns the first resolved input in declaration order.
    #[must_use]
    pub fn primary_input(&self) -> Option<&JsonValue> {
        self.node
            .inputs
            .iter()
            .find_map(|port| self.inputs.get(&port.name))
    }
}

/// Execution logic for one node kind.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs the node and returns values keyed by output port name.
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError>;
}

/// Maps node kinds to their executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<NodeKind> = self.executors.keys().copied().collect();
        kinds.sort();
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in executor that needs no
    /// external collaborator.
    #[must_use]
    pub fn with_builtins() -> Self {
        let entry: Arc<dyn NodeExecutor> = Arc::new(EntryExecutor);
        Self::new()
            .with(NodeKind::Trigger, Arc::clone(&entry))
            .with(NodeKind::Manual, Arc::clone(&entry))
            .with(NodeKind::Schedule, Arc::clone(&entry))
            .with(NodeKind::Webhook, entry)
            .with(NodeKind::Action, Arc::new(ActionExecutor))
            .with(NodeKind::Transform, Arc::new(TransformExecutor))
            .with(NodeKind::Condition, Arc::new(ConditionExecutor))
            .with(NodeKind::Http, Arc::new(HttpExecutor::new()))
    }

    /// Registers the `database` executor backed by a query runner.
    #[must_use]
    pub fn with_query_runner(self, runner: Arc<dyn QueryRunner>) -> Self {
        self.with(NodeKind::Database, Arc::new(DatabaseExecutor::new(runner)))
    }

    /// Registers the `email` executor backed by a mailer.
    #[must_use]
    pub fn with_mailer(self, mailer: Arc<dyn Mailer>) -> Self {
        self.with(NodeKind::Email, Arc::new(EmailExecutor::new(mailer)))
    }

    /// Registers (or replaces) the executor for a kind.
    #[must_use]
    pub fn with(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    /// Registers (or replaces) the executor for a kind.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    /// Returns true if an executor is registered for the kind.
    #[must_use]
    pub fn contains(&self, kind: NodeKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Runs one attempt of a node.
    ///
    /// Checks, in order: an executor exists for the kind, every required
    /// input is resolved, the executor succeeds, and it only produced
    /// declared outputs. Declared outputs it left out are returned as null.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails as a `NodeError`.
    pub async fn invoke(&self, invocation: NodeInvocation) -> Result<NodeOutputs, NodeError> {
        let node = Arc::clone(&invocation.node);
        let executor = self
            .executors
            .get(&node.kind())
            .ok_or_else(|| NodeError::UnknownNodeType {
                node_id: node.id.clone(),
                kind: node.kind(),
            })?;

        if let Some(missing) = node
            .inputs
            .iter()
            .find(|port| port.required && !invocation.inputs.contains_key(&port.name))
        {
            return Err(NodeError::MissingInput {
                node_id: node.id.clone(),
                port: missing.name.clone(),
            });
        }

        let mut outputs = executor
            .execute(invocation)
            .await
            .map_err(|source| NodeError::Execution {
                node_id: node.id.clone(),
                source,
            })?;

        if let Some(port) = outputs.keys().find(|name| node.output_port(name).is_none()) {
            return Err(NodeError::UndeclaredOutput {
                node_id: node.id.clone(),
                port: port.clone(),
            });
        }
        for port in &node.outputs {
            outputs.entry(port.name.clone()).or_insert(JsonValue::Null);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::node::{ActionConfig, NodeConfig, TransformConfig};
    use serde_json::json;
    use std::collections::BTreeSet;

    struct Fixed(NodeOutputs);

    #[async_trait]
    impl NodeExecutor for Fixed {
        async fn execute(&self, _: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
            Ok(self.0.clone())
        }
    }

    fn invocation(node: Node, inputs: BTreeMap<String, JsonValue>) -> NodeInvocation {
        NodeInvocation {
            execution_id: ExecutionId::new(),
            node: Arc::new(node),
            inputs,
            input_data: Arc::new(json!({})),
            context: ContextView::new(Arc::new(ExecutionContext::new()), BTreeSet::new()),
            cancel: CancellationToken::new(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn unknown_kind_fails() {
        let registry = ExecutorRegistry::new();
        let node = Node::new("a", "a", NodeConfig::Action(ActionConfig::default()));
        let err = registry
            .invoke(invocation(node, BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownNodeType { kind: NodeKind::Action, .. }));
    }

    #[tokio::test]
    async fn missing_required_input_short_circuits() {
        let registry = ExecutorRegistry::with_builtins();
        let node = Node::new("t", "t", NodeConfig::Transform(TransformConfig::default()));
        let err = registry
            .invoke(invocation(node, BTreeMap::new()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NodeError::MissingInput {
                node_id: "t".into(),
                port: "input".to_string()
            }
        );
    }

    #[tokio::test]
    async fn undeclared_output_fails() {
        let registry = ExecutorRegistry::new().with(
            NodeKind::Action,
            Arc::new(Fixed(BTreeMap::from([("extra".to_string(), json!(1))]))),
        );
        let node = Node::new("a", "a", NodeConfig::Action(ActionConfig::default()));
        let err = registry
            .invoke(invocation(node, BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UndeclaredOutput { .. }));
    }

    #[tokio::test]
    async fn omitted_outputs_become_null() {
        let registry = ExecutorRegistry::new().with(NodeKind::Action, Arc::new(Fixed(BTreeMap::new())));
        let node = Node::new("a", "a", NodeConfig::Action(ActionConfig::default()));
        let outputs = registry
            .invoke(invocation(node, BTreeMap::new()))
            .await
            .expect("invoke");
        assert_eq!(outputs.get("output"), Some(&JsonValue::Null));
    }

    #[test]
    fn builtins_skip_collaborator_kinds() {
        let registry = ExecutorRegistry::with_builtins();
        assert!(registry.contains(NodeKind::Http));
        assert!(!registry.contains(NodeKind::Database));
        assert!(!registry.contains(NodeKind::Email));
    }
}
