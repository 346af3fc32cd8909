//! Per-execution scheduler.
//!
//! One scheduler task drives one execution:
//! 1. Start the execution (PENDING -> RUNNING) right before the first dispatch
//! 2. Dispatch ready nodes, lowest ids first, up to the concurrency limit
//! 3. Publish each completed node's outputs and release its successors
//! 4. Skip the downstream closure of each failed node
//! 5. Once nothing is ready or in flight, record the terminal state
//!
//! Pause stops step 2 and lets in-flight nodes drain. Cancellation stops
//! step 2, is forwarded to in-flight nodes, and ends the run as CANCELLED
//! once they have returned. A context conflict ends the run immediately.

use crate::config::EngineConfig;
use crate::context::ContextView;
use crate::error::{ContextConflict, ExecutorError, NodeError, join_errors};
use crate::execution::{Execution, ExecutionStatus};
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId};
use crate::registry::{ExecutorRegistry, NodeOutputs};
use crate::remaining_work::{NodeState, RemainingWork};
use crate::run_state::{CANCELLED_MESSAGE, RunState};
use crate::worker::{WorkItem, Worker};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

type NodeResult = (NodeId, Result<NodeOutputs, NodeError>);

/// Drives one validated graph to a terminal state.
pub(crate) struct Scheduler {
    graph: Arc<WorkflowGraph>,
    state: Arc<RunState>,
    worker: Worker,
    input_data: Arc<JsonValue>,
    concurrency_limit: usize,
    /// Forwarded to in-flight nodes; a child of the run's token.
    node_cancel: CancellationToken,
}

/// Mutable bookkeeping of one scheduler run.
struct Dispatch {
    work: RemainingWork,
    tasks: JoinSet<NodeResult>,
    running: HashMap<task::Id, NodeId>,
    errors: Vec<NodeError>,
}

impl Scheduler {
    pub(crate) fn new(
        graph: Arc<WorkflowGraph>,
        registry: Arc<ExecutorRegistry>,
        state: Arc<RunState>,
        config: &EngineConfig,
    ) -> Self {
        let input_data = Arc::new(state.snapshot().input_data);
        let node_cancel = state.cancel_token().child_token();
        let worker = Worker::new(
            registry,
            Arc::clone(&state),
            Arc::clone(&input_data),
            node_cancel.clone(),
            config,
        );
        Self {
            graph,
            state,
            worker,
            input_data,
            concurrency_limit: config.concurrency_limit(),
            node_cancel,
        }
    }

    /// Runs the execution to a terminal state.
    #[instrument(skip_all, fields(execution_id = %self.state.execution_id()))]
    pub(crate) async fn run(self) {
        let cancel = self.state.cancel_token();
        if cancel.is_cancelled() {
            // The canceller finishes a PENDING execution itself.
            return;
        }
        if self.state.transition(Execution::start).await.is_err() {
            return;
        }

        let mut paused = self.state.subscribe_paused();
        let mut dispatch = Dispatch {
            work: RemainingWork::from_graph(&self.graph),
            tasks: JoinSet::new(),
            running: HashMap::new(),
            errors: Vec::new(),
        };

        loop {
            let cancelled = cancel.is_cancelled();
            let is_paused = *paused.borrow_and_update();
            if !cancelled && !is_paused {
                self.dispatch_ready(&mut dispatch);
            }

            if dispatch.work.in_flight().is_empty() {
                if cancelled {
                    self.finish_cancelled(&dispatch.work).await;
                    return;
                }
                if is_paused {
                    wait_for_resume(&cancel, &mut paused).await;
                    continue;
                }
                if dispatch.work.ready().is_empty() {
                    if self.finish(&dispatch).await {
                        return;
                    }
                    // Paused between the check and the transition.
                    continue;
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancelled => {
                    debug!("cancellation observed, draining in-flight nodes");
                }
                _ = paused.changed() => {}
                Some(joined) = dispatch.tasks.join_next_with_id() => {
                    let mut finished = vec![dispatch.node_result(joined)];
                    while let Some(joined) = dispatch.tasks.try_join_next_with_id() {
                        finished.push(dispatch.node_result(joined));
                    }
                    finished.sort_by(|a, b| a.0.cmp(&b.0));

                    for (node_id, result) in finished {
                        if let Err(conflict) = self.complete_node(&mut dispatch, node_id, result).await {
                            self.abort(&mut dispatch, &conflict).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Moves ready nodes into flight, up to the concurrency limit.
    fn dispatch_ready(&self, dispatch: &mut Dispatch) {
        let slots = self
            .concurrency_limit
            .saturating_sub(dispatch.work.in_flight().len());
        if slots == 0 {
            return;
        }
        let batch = dispatch.work.take_ready(slots);
        if batch.is_empty() {
            return;
        }
        debug!(nodes = ?batch, "dispatching batch");

        for node_id in &batch {
            let Some(node) = self.graph.node(node_id) else {
                dispatch.work.mark_failed(node_id);
                continue;
            };
            let item = WorkItem {
                node: Arc::new(node.clone()),
                inputs: self.resolve_inputs(node),
                context: ContextView::new(
                    Arc::clone(self.state.context()),
                    self.graph.ancestors(node_id),
                ),
            };
            let worker = self.worker.clone();
            let id = node_id.clone();
            let handle = dispatch
                .tasks
                .spawn(async move { (id, worker.process(item).await) });
            dispatch.running.insert(handle.id(), node_id.clone());
        }
        self.state.record_batch(batch);
    }

    /// Resolves a node's inputs from the run input (entry nodes) or from its
    /// inbound connections, falling back to defaults for optional inputs.
    fn resolve_inputs(&self, node: &Node) -> BTreeMap<String, JsonValue> {
        let inbound = self.graph.inbound_edges(&node.id);
        let mut inputs = BTreeMap::new();

        if inbound.is_empty() {
            if let JsonValue::Object(fields) = self.input_data.as_ref() {
                for port in &node.inputs {
                    if let Some(value) = fields.get(&port.name) {
                        inputs.insert(port.name.clone(), value.clone());
                    }
                }
            }
        } else {
            let context = self.state.context();
            for connection in inbound {
                let Some(resolved) = self.graph.resolve(connection) else {
                    continue;
                };
                if let Some(value) =
                    context.get(&resolved.source_node_id, &resolved.source_output)
                {
                    inputs.insert(resolved.target_input, value);
                }
            }
        }

        for port in node.inputs.iter().filter(|port| !port.required) {
            if let Some(default) = &port.default_value {
                inputs
                    .entry(port.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        inputs
    }

    /// Records one finished node. Only a context conflict is returned as an
    /// error; node failures are absorbed into the remaining work.
    async fn complete_node(
        &self,
        dispatch: &mut Dispatch,
        node_id: NodeId,
        result: Result<NodeOutputs, NodeError>,
    ) -> Result<(), ContextConflict> {
        let logs = self.state.logs();
        match result {
            Ok(outputs) => {
                self.state.context().write_outputs(&node_id, outputs)?;
                dispatch.work.mark_completed(&node_id);
                logs.info(Some(&node_id), format!("Node {node_id} completed"))
                    .await;
            }
            Err(NodeError::Cancelled { node_id }) if self.node_cancel.is_cancelled() => {
                dispatch.work.mark_failed(&node_id);
                logs.warn(Some(&node_id), format!("Node {node_id} cancelled"))
                    .await;
            }
            Err(err) => {
                let skipped = dispatch.work.mark_failed(&node_id);
                logs.error(
                    Some(&node_id),
                    err.log_message(),
                    json!({ "error": err.to_string() }),
                )
                .await;
                for skipped_id in skipped {
                    logs.warn(
                        Some(&skipped_id),
                        format!("Node {skipped_id} skipped: upstream node {node_id} failed"),
                    )
                    .await;
                }
                dispatch.errors.push(err);
            }
        }
        Ok(())
    }

    /// Records SUCCESS or FAILED. Returns false if the execution was paused
    /// in the meantime and has to wait for resume.
    async fn finish(&self, dispatch: &Dispatch) -> bool {
        let output_data = self.sink_outputs(&dispatch.work);
        let context = self.state.context().snapshot();

        let result = if dispatch.errors.is_empty() {
            self.state
                .transition(|execution| execution.complete(output_data, context))
                .await
        } else {
            let summary = join_errors(&dispatch.errors);
            self.state
                .transition(|execution| execution.fail(summary, Some(output_data), Some(context)))
                .await
        };
        result.is_ok() || self.state.status().is_terminal()
    }

    async fn finish_cancelled(&self, work: &RemainingWork) {
        self.state.logs().warn(None, CANCELLED_MESSAGE).await;
        let output_data = self.sink_outputs(work);
        let context = self.state.context().snapshot();
        let _ = self
            .state
            .transition(|execution| {
                execution.cancel(CANCELLED_MESSAGE, Some(output_data), Some(context))
            })
            .await;
    }

    /// Ends the run on a context conflict without waiting for siblings.
    async fn abort(&self, dispatch: &mut Dispatch, conflict: &ContextConflict) {
        self.node_cancel.cancel();
        dispatch.tasks.abort_all();
        while dispatch.tasks.join_next().await.is_some() {}

        let message = conflict.to_string();
        self.state
            .logs()
            .error(None, message.clone(), json!({ "key": conflict.key }))
            .await;
        let output_data = self.sink_outputs(&dispatch.work);
        let context = self.state.context().snapshot();
        let _ = self
            .state
            .transition(|execution| {
                if execution.status == ExecutionStatus::Paused {
                    execution.resume()?;
                }
                execution.fail(message, Some(output_data), Some(context))
            })
            .await;
    }

    /// Collects the outputs of completed nodes without outbound connections,
    /// keyed by node id then port name.
    fn sink_outputs(&self, work: &RemainingWork) -> JsonValue {
        let context = self.state.context();
        let mut sinks = Map::new();
        for node in self.graph.nodes() {
            if work.state(&node.id) != Some(NodeState::Completed)
                || !self.graph.outbound_edges(&node.id).is_empty()
            {
                continue;
            }
            let ports: Map<String, JsonValue> = node
                .outputs
                .iter()
                .map(|port| {
                    let value = context
                        .get(&node.id, &port.name)
                        .unwrap_or(JsonValue::Null);
                    (port.name.clone(), value)
                })
                .collect();
            sinks.insert(node.id.to_string(), JsonValue::Object(ports));
        }
        JsonValue::Object(sinks)
    }
}

impl Dispatch {
    /// Maps a joined task to its node, turning a panic into a node failure.
    fn node_result(&mut self, joined: Result<(task::Id, NodeResult), JoinError>) -> NodeResult {
        match joined {
            Ok((id, result)) => {
                self.running.remove(&id);
                result
            }
            Err(join_error) => {
                let node_id = self
                    .running
                    .remove(&join_error.id())
                    .unwrap_or_else(|| NodeId::new("unknown"));
                let source = ExecutorError::failed(format!("node task ended abnormally: {join_error}"));
                (node_id.clone(), Err(NodeError::Execution { node_id, source }))
            }
        }
    }
}

async fn wait_for_resume(cancel: &CancellationToken, paused: &mut watch::Receiver<bool>) {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {}
        _ = paused.changed() => {}
    }
}
