//! Execution records and their lifecycle state machine.
//!
//! ```text
//! PENDING ──> RUNNING ──> SUCCESS | FAILED | CANCELLED
//!    │          ^  │
//!    │          │  v
//!    │         PAUSED ──> CANCELLED
//!    └──> CANCELLED | FAILED
//! ```
//!
//! Only cancellation ends a PAUSED execution; it has to resume before it can
//! succeed or fail. Terminal states are final. `finished_at` and `duration_ms` are set once,
//! on entry into a terminal state.

use crate::error::TransitionError;
use autoflow_core::{ExecutionId, UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Record created, scheduler not started.
    Pending,
    /// Scheduler has dispatched at least one node.
    Running,
    /// Dispatch suspended; in-flight nodes drain.
    Paused,
    /// Every node completed.
    Success,
    /// At least one node failed, or the graph was invalid.
    Failed,
    /// Cancellation was observed before natural completion.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the state machine allows moving to `to`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        use ExecutionStatus::{Cancelled, Failed, Paused, Pending, Running, Success};
        matches!(
            (self, to),
            (Pending, Running | Cancelled | Failed)
                | (Running, Paused | Success | Failed | Cancelled)
                | (Paused, Running | Cancelled)
        )
    }

    /// Returns the persisted name of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a persisted status name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Pending,
            Self::Running,
            Self::Paused,
            Self::Success,
            Self::Failed,
            Self::Cancelled,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub user_id: UserId,
    pub status: ExecutionStatus,
    pub input_data: JsonValue,
    /// Outputs of the completed sink nodes.
    pub output_data: Option<JsonValue>,
    /// Snapshot of the execution context, taken at the terminal transition.
    pub context: Option<JsonValue>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `finished_at - started_at`, zero if never started.
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    /// Creates a new execution in the PENDING state.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, user_id: UserId, input_data: JsonValue) -> Self {
        Self::with_id(ExecutionId::new(), workflow_id, user_id, input_data)
    }

    /// Creates a new PENDING execution with a caller-chosen id.
    #[must_use]
    pub fn with_id(
        id: ExecutionId,
        workflow_id: WorkflowId,
        user_id: UserId,
        input_data: JsonValue,
    ) -> Self {
        Self {
            id,
            workflow_id,
            user_id,
            status: ExecutionStatus::Pending,
            input_data,
            output_data: None,
            context: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// PENDING -> RUNNING; records `started_at`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is PENDING.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                to: ExecutionStatus::Running,
            });
        }
        self.transition(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// RUNNING -> PAUSED.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is RUNNING.
    pub fn pause(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Paused)
    }

    /// PAUSED -> RUNNING.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is PAUSED.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        if self.status != ExecutionStatus::Paused {
            return Err(TransitionError {
                from: self.status,
                to: ExecutionStatus::Running,
            });
        }
        self.transition(ExecutionStatus::Running)
    }

    /// Marks the execution as successful.
    ///
    /// # Errors
    ///
    /// Returns an error unless the execution is RUNNING.
    pub fn complete(
        &mut self,
        output_data: JsonValue,
        context: JsonValue,
    ) -> Result<(), TransitionError> {
        self.finish(ExecutionStatus::Success, Some(output_data), Some(context), None)
    }

    /// Marks the execution as failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is PAUSED or already terminal.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        output_data: Option<JsonValue>,
        context: Option<JsonValue>,
    ) -> Result<(), TransitionError> {
        self.finish(ExecutionStatus::Failed, output_data, context, Some(error.into()))
    }

    /// Marks the execution as cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the execution is already terminal.
    pub fn cancel(
        &mut self,
        error: impl Into<String>,
        output_data: Option<JsonValue>,
        context: Option<JsonValue>,
    ) -> Result<(), TransitionError> {
        self.finish(ExecutionStatus::Cancelled, output_data, context, Some(error.into()))
    }

    fn finish(
        &mut self,
        status: ExecutionStatus,
        output_data: Option<JsonValue>,
        context: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), TransitionError> {
        self.transition(status)?;
        let finished_at = Utc::now();
        self.finished_at = Some(finished_at);
        self.duration_ms = Some(
            self.started_at
                .map_or(0, |started| (finished_at - started).num_milliseconds().max(0)),
        );
        self.output_data = output_data;
        self.context = context;
        self.error = error;
        Ok(())
    }

    /// Returns the persistence update describing the current state.
    #[must_use]
    pub fn update(&self) -> ExecutionUpdate {
        ExecutionUpdate {
            status: self.status,
            output_data: self.output_data.clone(),
            context: self.context.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms,
        }
    }
}

/// A status change reported to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdate {
    pub status: ExecutionStatus,
    pub output_data: Option<JsonValue>,
    pub context: Option<JsonValue>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ExecutionUpdate {
    /// Applies this update to a stored record.
    pub fn apply_to(&self, execution: &mut Execution) {
        execution.status = self.status;
        execution.output_data.clone_from(&self.output_data);
        execution.context.clone_from(&self.context);
        execution.error.clone_from(&self.error);
        execution.started_at = self.started_at;
        execution.finished_at = self.finished_at;
        execution.duration_ms = self.duration_ms;
    }
}
