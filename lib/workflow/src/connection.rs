//! Connection types for workflow graphs.
//!
//! A connection carries data from an output port of one node to an input
//! port of another. Port names may be omitted when the node has exactly one
//! port in that direction.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A directed data-dependency edge between two nodes' ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// The node producing the data.
    pub source_node_id: NodeId,
    /// The output port on the source node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_output: Option<String>,
    /// The node consuming the data.
    pub target_node_id: NodeId,
    /// The input port on the target node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_input: Option<String>,
    /// Free-form editor metadata.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub data: JsonValue,
}

impl Connection {
    /// Creates a connection relying on each node's single port.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source_node_id: source.into(),
            source_output: None,
            target_node_id: target.into(),
            target_input: None,
            data: JsonValue::Null,
        }
    }

    /// Creates a connection between named ports.
    #[must_use]
    pub fn between(
        source: impl Into<NodeId>,
        source_output: impl Into<String>,
        target: impl Into<NodeId>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            source_node_id: source.into(),
            source_output: Some(source_output.into()),
            target_node_id: target.into(),
            target_input: Some(target_input.into()),
            data: JsonValue::Null,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.source_node_id,
            self.source_output.as_deref().unwrap_or("*"),
            self.target_node_id,
            self.target_input.as_deref().unwrap_or("*"),
        )
    }
}

/// A connection whose port names have been resolved against the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub source_node_id: NodeId,
    pub source_output: String,
    pub target_node_id: NodeId,
    pub target_input: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_persisted_shape() {
        let conn: Connection = serde_json::from_value(json!({
            "sourceNodeId": "a",
            "targetNodeId": "b",
            "targetInput": "input"
        }))
        .expect("deserialize");

        assert_eq!(conn.source_node_id, NodeId::from("a"));
        assert_eq!(conn.source_output, None);
        assert_eq!(conn.target_input.as_deref(), Some("input"));
    }

    #[test]
    fn display_marks_implicit_ports() {
        let conn = Connection::new("a", "b");
        assert_eq!(conn.to_string(), "a:* -> b:*");
        let named = Connection::between("a", "result", "b", "input");
        assert_eq!(named.to_string(), "a:result -> b:input");
    }
}
