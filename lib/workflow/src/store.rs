//! Persistence collaborators.
//!
//! The engine only observes these traits; backing implementations live in
//! the runner (PostgreSQL, files). The in-memory implementations here are
//! used by tests and by the runner when no database is configured.

use crate::definition::WorkflowDefinition;
use crate::error::StoreError;
use crate::execution::{Execution, ExecutionUpdate};
use crate::log::LogEntry;
use async_trait::async_trait;
use autoflow_core::{ExecutionId, UserId, WorkflowId};
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

/// Stores execution records and their logs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates a PENDING execution record.
    async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        input_data: JsonValue,
    ) -> Result<Execution, Report<StoreError>>;

    /// Records a lifecycle change.
    async fn update_execution_status(
        &self,
        execution_id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<(), Report<StoreError>>;

    /// Appends one log entry.
    async fn append_log(&self, entry: LogEntry) -> Result<(), Report<StoreError>>;
}

/// Loads workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, Report<StoreError>>;
}

/// In-process execution store.
///
/// Log entries belong to their execution: appending to an unknown execution
/// fails, and deleting an execution deletes its log.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    logs: Mutex<HashMap<ExecutionId, Vec<LogEntry>>>,
}

impl MemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an existing record.
    pub fn insert(&self, execution: Execution) {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.id, execution);
    }

    /// Returns the stored record.
    #[must_use]
    pub fn execution(&self, execution_id: ExecutionId) -> Option<Execution> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned()
    }

    /// Returns the stored log ordered by sequence.
    #[must_use]
    pub fn logs(&self, execution_id: ExecutionId) -> Vec<LogEntry> {
        let mut entries = self
            .logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    /// Deletes an execution and its log. Returns false if it did not exist.
    pub fn delete_execution(&self, execution_id: ExecutionId) -> bool {
        let removed = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&execution_id)
            .is_some();
        if removed {
            self.logs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&execution_id);
        }
        removed
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        user_id: UserId,
        input_data: JsonValue,
    ) -> Result<Execution, Report<StoreError>> {
        let execution = Execution::new(workflow_id, user_id, input_data);
        self.insert(execution.clone());
        Ok(execution)
    }

    async fn update_execution_status(
        &self,
        execution_id: ExecutionId,
        update: ExecutionUpdate,
    ) -> Result<(), Report<StoreError>> {
        let mut executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
        let execution = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound { execution_id })?;
        update.apply_to(execution);
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), Report<StoreError>> {
        let execution_id = entry.execution_id;
        let known = self
            .executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&execution_id);
        if !known {
            return Err(StoreError::ExecutionNotFound { execution_id }.into());
        }
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(execution_id)
            .or_default()
            .push(entry);
        Ok(())
    }
}

/// In-process workflow definition store.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, WorkflowDefinition>>,
}

impl MemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a definition.
    pub fn insert(&self, workflow: WorkflowDefinition) {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow.id, workflow);
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn load_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowDefinition, Report<StoreError>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkflowNotFound { workflow_id }.into())
    }
}
