//! Core types shared by every autoflow crate.
//!
//! Provides the strongly typed identifiers for workflows, executions and
//! users, plus the rootcause-based `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, ParseIdError, UserId, WorkflowId};
