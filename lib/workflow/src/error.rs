//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: Building the graph model from a definition
//! - `ValidationError`: Structural problems that make a graph unschedulable
//! - `ExecutorError`: What a node executor reports
//! - `NodeError`: Why a single node did not complete within a run
//! - `ContextConflict` / `TransitionError`: Invariant violations
//! - `StoreError`: Persistence collaborator failures
//! - `EngineError`: Facade operations (wraps lower errors)

use crate::definition::WorkflowStatus;
use crate::execution::ExecutionStatus;
use crate::node::{NodeId, NodeKind};
use crate::port::PortType;
use autoflow_core::{ExecutionId, WorkflowId};
use std::fmt;

/// Errors from building a graph model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share the same identifier.
    DuplicateNode { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Which end of a connection an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Target,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// A structural problem found by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A connection endpoint references a node not in the graph.
    DanglingReference {
        connection: usize,
        endpoint: Endpoint,
        node_id: NodeId,
    },
    /// A connection names a port the node does not declare, or omits the
    /// name while the node has zero or several ports in that direction.
    PortNotFound {
        connection: usize,
        endpoint: Endpoint,
        node_id: NodeId,
        port: Option<String>,
    },
    /// A target input receives more than one connection.
    InputAlreadyConnected { node_id: NodeId, port: String },
    /// A node id contains '.', which would make its context keys ambiguous.
    InvalidNodeId { node_id: NodeId },
    /// The data edges form a cycle; `nodes` lists it in traversal order.
    Cycle { nodes: Vec<NodeId> },
    /// Every node has an inbound connection.
    NoEntryPoint,
    /// A connection joins two concrete, different port types.
    PortTypeMismatch {
        source_node: NodeId,
        source_output: String,
        source_type: PortType,
        target_node: NodeId,
        target_input: String,
        target_type: PortType,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingReference {
                connection,
                endpoint,
                node_id,
            } => write!(
                f,
                "connection #{connection} {endpoint} references unknown node {node_id}"
            ),
            Self::PortNotFound {
                connection,
                endpoint,
                node_id,
                port: Some(port),
            } => write!(
                f,
                "connection #{connection} {endpoint} port '{port}' not found on node {node_id}"
            ),
            Self::PortNotFound {
                connection,
                endpoint,
                node_id,
                port: None,
            } => write!(
                f,
                "connection #{connection} {endpoint} port is unnamed but node {node_id} has no single port"
            ),
            Self::InputAlreadyConnected { node_id, port } => {
                write!(f, "input '{port}' on node {node_id} has more than one connection")
            }
            Self::InvalidNodeId { node_id } => {
                write!(f, "node id '{node_id}' must not contain '.'")
            }
            Self::Cycle { nodes } => {
                let path: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "cycle detected: {}", path.join(" -> "))
            }
            Self::NoEntryPoint => write!(f, "workflow has no entry point"),
            Self::PortTypeMismatch {
                source_node,
                source_output,
                source_type,
                target_node,
                target_input,
                target_type,
            } => write!(
                f,
                "type mismatch: {source_node}:{source_output} ({source_type}) -> {target_node}:{target_input} ({target_type})"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A failure reported by a node executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The inputs did not have the shape the executor needs.
    InvalidInput(String),
    /// The executor failed; the message is shown to users as-is.
    Failed(String),
    /// An external service returned an error.
    External { service: String, message: String },
    /// The executor observed cancellation and stopped.
    Cancelled,
}

impl ExecutorError {
    /// Creates a plain failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Failed(msg) => f.write_str(msg),
            Self::External { service, message } => write!(f, "{service}: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Why a node did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A required input was neither connected nor bound.
    MissingInput { node_id: NodeId, port: String },
    /// No executor is registered for the node's kind.
    UnknownNodeType { node_id: NodeId, kind: NodeKind },
    /// The executor reported a failure.
    Execution {
        node_id: NodeId,
        source: ExecutorError,
    },
    /// The executor produced an output the node does not declare.
    UndeclaredOutput { node_id: NodeId, port: String },
    /// The invocation exceeded its timeout.
    Timeout { node_id: NodeId, timeout_ms: u64 },
    /// The run was cancelled while the node was in flight.
    Cancelled { node_id: NodeId },
}

impl NodeError {
    /// Returns the offending node.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        match self {
            Self::MissingInput { node_id, .. }
            | Self::UnknownNodeType { node_id, .. }
            | Self::Execution { node_id, .. }
            | Self::UndeclaredOutput { node_id, .. }
            | Self::Timeout { node_id, .. }
            | Self::Cancelled { node_id } => node_id,
        }
    }

    /// Returns true if another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution { source, .. } => !matches!(source, ExecutorError::Cancelled),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// The message recorded in the execution log for this failure.
    #[must_use]
    pub fn log_message(&self) -> String {
        match self {
            Self::Execution { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput { node_id, port } => {
                write!(f, "missing required input '{port}' for node {node_id}")
            }
            Self::UnknownNodeType { node_id, kind } => {
                write!(f, "no executor registered for node type '{kind}' (node {node_id})")
            }
            Self::Execution { node_id, source } => write!(f, "node {node_id} failed: {source}"),
            Self::UndeclaredOutput { node_id, port } => {
                write!(f, "node {node_id} produced undeclared output '{port}'")
            }
            Self::Timeout {
                node_id,
                timeout_ms,
            } => write!(f, "node {node_id} timed out after {timeout_ms}ms"),
            Self::Cancelled { node_id } => write!(f, "node {node_id} cancelled"),
        }
    }
}

impl std::error::Error for NodeError {}

/// A second write to an execution-context key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConflict {
    pub key: String,
}

impl fmt::Display for ContextConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context key '{}' written twice", self.key)
    }
}

impl std::error::Error for ContextConflict {}

/// An illegal execution lifecycle move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Errors from persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The workflow definition does not exist.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// The execution record does not exist.
    ExecutionNotFound { execution_id: ExecutionId },
    /// The stored definition could not be decoded.
    InvalidDefinition { details: String },
    /// The backing store failed.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::InvalidDefinition { details } => write!(f, "invalid workflow definition: {details}"),
            Self::Backend { details } => write!(f, "store failure: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the engine facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow is not in the `active` state.
    WorkflowNotActive {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    },
    /// The definition could not be turned into a graph.
    InvalidGraph { details: String },
    /// The graph failed validation; the execution was recorded as FAILED.
    Validation {
        execution_id: ExecutionId,
        errors: Vec<ValidationError>,
    },
    /// The engine already tracks this execution.
    AlreadySubmitted { execution_id: ExecutionId },
    /// The engine does not track this execution.
    UnknownExecution { execution_id: ExecutionId },
    /// The requested lifecycle move is not possible now.
    InvalidTransition {
        execution_id: ExecutionId,
        source: TransitionError,
    },
    /// A persistence collaborator failed.
    Store { details: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotActive {
                workflow_id,
                status,
            } => write!(f, "workflow {workflow_id} is {status}, not active"),
            Self::InvalidGraph { details } => write!(f, "invalid workflow graph: {details}"),
            Self::Validation {
                execution_id,
                errors,
            } => {
                write!(f, "execution {execution_id} failed validation: ")?;
                write!(f, "{}", join_errors(errors))
            }
            Self::AlreadySubmitted { execution_id } => {
                write!(f, "execution {execution_id} already submitted")
            }
            Self::UnknownExecution { execution_id } => {
                write!(f, "execution {execution_id} is not tracked by this engine")
            }
            Self::InvalidTransition {
                execution_id,
                source,
            } => write!(f, "execution {execution_id}: {source}"),
            Self::Store { details } => write!(f, "persistence failed: {details}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Joins errors into a single `; `-separated summary.
pub(crate) fn join_errors<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
