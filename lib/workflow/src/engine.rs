//! Engine facade.
//!
//! The transport layer talks to the engine through this type: submit a
//! validated graph for an existing PENDING execution, then poll, pause,
//! resume, cancel or wait on it. Each submitted execution gets its own
//! scheduler task; executions share nothing but the registry and the
//! store.

use crate::config::EngineConfig;
use crate::error::{EngineError, TransitionError, join_errors};
use crate::execution::{Execution, ExecutionStatus};
use crate::graph::WorkflowGraph;
use crate::log::LogEntry;
use crate::node::NodeId;
use crate::registry::ExecutorRegistry;
use crate::run_state::RunState;
use crate::scheduler::Scheduler;
use crate::store::{ExecutionStore, WorkflowStore};
use crate::validator::validate;
use autoflow_core::{ExecutionId, UserId, WorkflowId};
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, instrument};

/// Runs workflow executions.
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    runs: Mutex<HashMap<ExecutionId, Arc<RunState>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new(registry: ExecutorRegistry, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            config: EngineConfig::default(),
            store,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the configuration used for subsequent submissions.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn run(&self, execution_id: ExecutionId) -> Option<Arc<RunState>> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned()
    }

    fn tracked(&self, execution_id: ExecutionId) -> Result<Arc<RunState>, Report<EngineError>> {
        self.run(execution_id)
            .ok_or_else(|| EngineError::UnknownExecution { execution_id }.into())
    }

    /// Loads a workflow, creates its execution record and submits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow cannot be loaded, is not active, has
    /// duplicate node ids, or fails validation. A validation failure still
    /// leaves a FAILED execution record behind.
    #[instrument(skip(self, workflows, input_data))]
    pub async fn execute(
        &self,
        workflows: &dyn WorkflowStore,
        workflow_id: WorkflowId,
        user_id: UserId,
        input_data: JsonValue,
    ) -> Result<ExecutionId, Report<EngineError>> {
        let workflow = workflows
            .load_workflow(workflow_id)
            .await
            .map_err(|e| EngineError::Store {
                details: e.to_string(),
            })?;
        if !workflow.is_active() {
            return Err(EngineError::WorkflowNotActive {
                workflow_id,
                status: workflow.status,
            }
            .into());
        }
        let graph = workflow.graph().map_err(|e| EngineError::InvalidGraph {
            details: e.to_string(),
        })?;

        let execution = self
            .store
            .create_execution(workflow_id, user_id, input_data)
            .await
            .map_err(|e| EngineError::Store {
                details: e.to_string(),
            })?;
        let execution_id = execution.id;
        self.submit(graph, execution).await?;
        Ok(execution_id)
    }

    /// Begins asynchronous execution of a PENDING execution record.
    ///
    /// The graph is validated first. An invalid graph never reaches
    /// RUNNING: the execution is recorded as FAILED with the validation
    /// errors as its `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is already tracked, is not PENDING,
    /// or the graph fails validation.
    #[instrument(skip(self, graph, execution), fields(execution_id = %execution.id))]
    pub async fn submit(
        &self,
        graph: WorkflowGraph,
        execution: Execution,
    ) -> Result<(), Report<EngineError>> {
        let execution_id = execution.id;
        if execution.status != ExecutionStatus::Pending {
            return Err(EngineError::InvalidTransition {
                execution_id,
                source: TransitionError {
                    from: execution.status,
                    to: ExecutionStatus::Running,
                },
            }
            .into());
        }

        let state = {
            let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
            if runs.contains_key(&execution_id) {
                return Err(EngineError::AlreadySubmitted { execution_id }.into());
            }
            let state = Arc::new(RunState::new(execution, Arc::clone(&self.store)));
            runs.insert(execution_id, Arc::clone(&state));
            state
        };

        if let Err(errors) = validate(&graph) {
            let summary = join_errors(&errors);
            let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
            state
                .logs()
                .error(
                    None,
                    format!("Workflow validation failed: {summary}"),
                    json!({ "errors": details }),
                )
                .await;
            let _ = state
                .transition(|execution| execution.fail(summary, None, None))
                .await;
            return Err(EngineError::Validation {
                execution_id,
                errors,
            }
            .into());
        }

        info!(nodes = graph.node_count(), "execution submitted");
        let scheduler = Scheduler::new(
            Arc::new(graph),
            Arc::clone(&self.registry),
            state,
            &self.config,
        );
        tokio::spawn(scheduler.run());
        Ok(())
    }

    /// Requests cooperative cancellation.
    ///
    /// Returns false if the execution is unknown or already terminal.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: ExecutionId) -> bool {
        match self.run(execution_id) {
            Some(state) => state.cancel().await,
            None => false,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn status(&self, execution_id: ExecutionId) -> Option<ExecutionStatus> {
        self.run(execution_id).map(|state| state.status())
    }

    /// Suspends dispatch of new nodes; in-flight nodes drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is unknown or not RUNNING.
    #[instrument(skip(self))]
    pub async fn pause(&self, execution_id: ExecutionId) -> Result<(), Report<EngineError>> {
        let state = self.tracked(execution_id)?;
        state
            .pause()
            .await
            .map_err(|source| EngineError::InvalidTransition {
                execution_id,
                source,
            })?;
        Ok(())
    }

    /// Resumes dispatch of a paused execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is unknown or not PAUSED.
    #[instrument(skip(self))]
    pub async fn resume(&self, execution_id: ExecutionId) -> Result<(), Report<EngineError>> {
        let state = self.tracked(execution_id)?;
        state
            .resume()
            .await
            .map_err(|source| EngineError::InvalidTransition {
                execution_id,
                source,
            })?;
        Ok(())
    }

    /// Waits for the execution to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is unknown.
    pub async fn wait(&self, execution_id: ExecutionId) -> Result<Execution, Report<EngineError>> {
        let state = self.tracked(execution_id)?;
        Ok(state.wait().await)
    }

    /// Returns a copy of the execution record.
    #[must_use]
    pub fn snapshot(&self, execution_id: ExecutionId) -> Option<Execution> {
        self.run(execution_id).map(|state| state.snapshot())
    }

    /// Returns the execution log in sequence order.
    #[must_use]
    pub fn logs(&self, execution_id: ExecutionId) -> Option<Vec<LogEntry>> {
        self.run(execution_id).map(|state| state.log_entries())
    }

    /// Returns the groups of nodes dispatched together, in dispatch order.
    #[must_use]
    pub fn dispatch_batches(&self, execution_id: ExecutionId) -> Option<Vec<Vec<NodeId>>> {
        self.run(execution_id).map(|state| state.dispatch_batches())
    }

    /// Forgets terminal executions. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let before = runs.len();
        runs.retain(|_, state| !state.status().is_terminal());
        before - runs.len()
    }
}
