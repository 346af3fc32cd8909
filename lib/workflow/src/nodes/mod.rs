//! Built-in node executors.
//!
//! - Entry kinds (`trigger`, `manual`, `schedule`, `webhook`) emit the run's input data
//! - `action`, `transform` and `condition` reshape or test their input
//! - `http` calls out with `reqwest`
//! - `database` and `email` delegate to collaborators supplied by the host

mod builtin;
mod database;
mod email;
mod http;

pub use builtin::{ActionExecutor, ConditionExecutor, EntryExecutor, TransformExecutor};
pub use database::{DatabaseExecutor, QueryRunner};
pub use email::{EmailExecutor, EmailMessage, Mailer};
pub use http::HttpExecutor;

use crate::node::Node;

/// Name of the port an executor with a single result writes to.
fn primary_output(node: &Node) -> String {
    node.outputs
        .first()
        .map_or_else(|| "output".to_string(), |port| port.name.clone())
}
