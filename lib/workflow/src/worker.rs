//! Runs one dispatched node to completion.
//!
//! The worker owns the per-node attempt loop:
//! 1. Invoke the registry under the node's timeout
//! 2. On a retryable failure, log a WARN entry and back off
//! 3. Stop early once the run is cancelled
//!
//! It never touches the context or the remaining work; the scheduler does
//! that with the result.

use crate::config::EngineConfig;
use crate::context::ContextView;
use crate::error::{ExecutorError, NodeError};
use crate::node::Node;
use crate::registry::{ExecutorRegistry, NodeInvocation, NodeOutputs};
use crate::retry::RetryPolicy;
use crate::run_state::RunState;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One node ready to run, with its inputs resolved.
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub node: Arc<Node>,
    pub inputs: BTreeMap<String, JsonValue>,
    pub context: ContextView,
}

/// Executes work items for one execution.
#[derive(Debug, Clone)]
pub(crate) struct Worker {
    registry: Arc<ExecutorRegistry>,
    state: Arc<RunState>,
    input_data: Arc<JsonValue>,
    cancel: CancellationToken,
    node_timeout_ms: u64,
    retry: RetryPolicy,
}

impl Worker {
    pub(crate) fn new(
        registry: Arc<ExecutorRegistry>,
        state: Arc<RunState>,
        input_data: Arc<JsonValue>,
        cancel: CancellationToken,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            state,
            input_data,
            cancel,
            node_timeout_ms: config.node_timeout_ms,
            retry: config.retry.clone(),
        }
    }

    /// Runs a node until it succeeds, fails for good, or the run is cancelled.
    pub(crate) async fn process(&self, item: WorkItem) -> Result<NodeOutputs, NodeError> {
        let node_id = item.node.id.clone();
        let retry = item.node.retry.as_ref().unwrap_or(&self.retry);
        let attempts = retry.attempts();
        let timeout_ms = item.node.timeout_ms.unwrap_or(self.node_timeout_ms);

        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(NodeError::Cancelled { node_id });
            }

            let invocation = NodeInvocation {
                execution_id: self.state.execution_id(),
                node: Arc::clone(&item.node),
                inputs: item.inputs.clone(),
                input_data: Arc::clone(&self.input_data),
                context: item.context.clone(),
                cancel: self.cancel.clone(),
                attempt,
            };
            debug!(
                execution_id = %invocation.execution_id,
                node_id = %node_id,
                attempt,
                "invoking node"
            );

            let result = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.registry.invoke(invocation),
            )
            .await
            .unwrap_or_else(|_| {
                Err(NodeError::Timeout {
                    node_id: node_id.clone(),
                    timeout_ms,
                })
            });

            let err = match result {
                Ok(outputs) => return Ok(outputs),
                // An executor giving up on its own is a failure.
                Err(NodeError::Execution {
                    node_id,
                    source: ExecutorError::Cancelled,
                }) if self.cancel.is_cancelled() => {
                    return Err(NodeError::Cancelled { node_id });
                }
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= attempts || self.cancel.is_cancelled() {
                return Err(err);
            }

            let delay = retry.delay(attempt);
            self.state
                .logs()
                .warn(
                    Some(&node_id),
                    format!(
                        "Node {node_id} attempt {attempt} of {attempts} failed, retrying in {}ms: {}",
                        delay.as_millis(),
                        err.log_message()
                    ),
                )
                .await;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(NodeError::Cancelled { node_id }),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::execution::Execution;
    use crate::log::LogLevel;
    use crate::node::{ActionConfig, NodeConfig, NodeKind};
    use crate::registry::NodeExecutor;
    use crate::store::MemoryExecutionStore;
    use async_trait::async_trait;
    use autoflow_core::{UserId, WorkflowId};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until the given attempt, then emits the attempt number.
    struct Flaky {
        succeed_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl NodeExecutor for Flaky {
        async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if invocation.attempt < self.succeed_on {
                return Err(ExecutorError::failed("flaky"));
            }
            Ok(BTreeMap::from([(
                "output".to_string(),
                json!(invocation.attempt),
            )]))
        }
    }

    struct Slow;

    #[async_trait]
    impl NodeExecutor for Slow {
        async fn execute(&self, _: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(BTreeMap::new())
        }
    }

    /// Reports cancellation whether or not the run was cancelled.
    struct Quits;

    #[async_trait]
    impl NodeExecutor for Quits {
        async fn execute(&self, _: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
            Err(ExecutorError::Cancelled)
        }
    }

    fn worker(executor: Arc<dyn NodeExecutor>, config: &EngineConfig) -> Worker {
        let registry = ExecutorRegistry::new().with(NodeKind::Action, executor);
        let execution = Execution::new(WorkflowId::new(), UserId::new(), json!({}));
        let state = Arc::new(RunState::new(
            execution,
            Arc::new(MemoryExecutionStore::new()),
        ));
        Worker::new(
            Arc::new(registry),
            Arc::clone(&state),
            Arc::new(json!({})),
            state.cancel_token(),
            config,
        )
    }

    fn item(node: Node) -> WorkItem {
        WorkItem {
            node: Arc::new(node),
            inputs: BTreeMap::new(),
            context: ContextView::new(Arc::new(ExecutionContext::new()), BTreeSet::new()),
        }
    }

    fn action() -> Node {
        Node::new("a", "a", NodeConfig::Action(ActionConfig::default()))
    }

    #[tokio::test]
    async fn default_policy_fails_fast() {
        let flaky = Arc::new(Flaky {
            succeed_on: 2,
            calls: AtomicU32::new(0),
        });
        let worker = worker(flaky.clone(), &EngineConfig::default());

        let err = worker.process(item(action())).await.unwrap_err();
        assert!(matches!(err, NodeError::Execution { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn node_policy_retries_with_warnings() {
        let flaky = Arc::new(Flaky {
            succeed_on: 3,
            calls: AtomicU32::new(0),
        });
        let worker = worker(flaky.clone(), &EngineConfig::default());
        let node = action().with_retry(RetryPolicy::fixed(3, 1));

        let outputs = worker.process(item(node)).await.expect("third attempt");
        assert_eq!(outputs.get("output"), Some(&json!(3)));

        let warnings: Vec<_> = worker
            .state
            .log_entries()
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn)
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("attempt 1 of 3"));
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let config = EngineConfig::default().with_node_timeout_ms(20);
        let worker = worker(Arc::new(Slow), &config);

        let err = worker.process(item(action())).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Timeout {
                node_id: "a".into(),
                timeout_ms: 20
            }
        );
    }

    #[tokio::test]
    async fn cancelled_run_is_not_invoked() {
        let flaky = Arc::new(Flaky {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let worker = worker(flaky.clone(), &EngineConfig::default());
        worker.cancel.cancel();

        let err = worker.process(item(action())).await.unwrap_err();
        assert!(matches!(err, NodeError::Cancelled { .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn executor_cancel_without_run_cancel_is_a_failure() {
        let worker = worker(Arc::new(Quits), &EngineConfig::default());
        let node = action().with_retry(RetryPolicy::fixed(3, 1));

        let err = worker.process(item(node)).await.unwrap_err();
        assert_eq!(
            err,
            NodeError::Execution {
                node_id: "a".into(),
                source: ExecutorError::Cancelled
            }
        );
        assert!(worker.state.log_entries().is_empty());
    }
}
