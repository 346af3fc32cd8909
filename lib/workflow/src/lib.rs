//! Workflow graph execution engine for autoflow.
//!
//! This crate provides:
//!
//! - **Graph Model**: Read-only petgraph view over a workflow's nodes and connections
//! - **Validation**: Structural checks that run before any execution starts
//! - **Node Executors**: A registry keyed by node kind, with built-in executors
//! - **Scheduling**: Bounded-concurrency dispatch of ready nodes per execution
//! - **Execution**: Lifecycle state machine, context and ordered log
//! - **Collaborators**: Store traits plus in-memory implementations

pub mod config;
pub mod connection;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod log;
pub mod node;
pub mod nodes;
pub mod port;
pub mod registry;
pub mod remaining_work;
pub mod retry;
pub mod run_state;
mod scheduler;
pub mod store;
pub mod validator;
mod worker;

pub use config::EngineConfig;
pub use connection::{Connection, ResolvedConnection};
pub use context::{ContextView, ExecutionContext};
pub use definition::{WorkflowDefinition, WorkflowStatus};
pub use engine::Engine;
pub use error::{
    ContextConflict, EngineError, ExecutorError, GraphError, NodeError, StoreError,
    TransitionError, ValidationError,
};
pub use execution::{Execution, ExecutionStatus, ExecutionUpdate};
pub use graph::WorkflowGraph;
pub use log::{ExecutionLogSink, LogEntry, LogLevel};
pub use node::{Node, NodeConfig, NodeId, NodeKind};
pub use port::{InputPort, OutputPort, PortType};
pub use registry::{ExecutorRegistry, NodeExecutor, NodeInvocation, NodeOutputs};
pub use retry::{Backoff, RetryPolicy};
pub use store::{ExecutionStore, MemoryExecutionStore, MemoryWorkflowStore, WorkflowStore};
pub use validator::{ValidationResult, validate};
