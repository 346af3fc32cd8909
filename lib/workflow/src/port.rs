//! Port system for workflow nodes.
//!
//! Ports are the named connection points on a node. Inputs may be required
//! and may carry a default value; outputs are written into the execution
//! context under `node_id.output_name` when the node completes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The declared data type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    /// Accepts any JSON value.
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl PortType {
    /// Returns true if a value produced by a port of this type may flow into
    /// a port of `other` type.
    ///
    /// `Any` on either side is compatible with everything.
    #[must_use]
    pub fn is_compatible_with(self, other: Self) -> bool {
        self == Self::Any || other == Self::Any || self == other
    }

    /// Returns true if the JSON value is an instance of this type.
    #[must_use]
    pub fn accepts(self, value: &JsonValue) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    /// Returns the lowercase name used in serialized definitions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input port on a workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPort {
    /// The name of this port.
    pub name: String,
    /// The accepted data type.
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    /// Whether this input must be supplied by a connection (or, for entry
    /// nodes, by the execution input data).
    #[serde(default)]
    pub required: bool,
    /// Value used when an optional input is left unconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
}

impl InputPort {
    /// Creates a new required input port.
    #[must_use]
    pub fn required(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: true,
            default_value: None,
        }
    }

    /// Creates a new optional input port.
    #[must_use]
    pub fn optional(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
            required: false,
            default_value: None,
        }
    }

    /// Sets the default value used when the input is unconnected.
    #[must_use]
    pub fn with_default(mut self, value: JsonValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// An output port on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    /// The name of this port.
    pub name: String,
    /// The produced data type.
    #[serde(rename = "type", default)]
    pub port_type: PortType,
}

impl OutputPort {
    /// Creates a new output port.
    #[must_use]
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn any_compatible_with_all() {
        assert!(PortType::Any.is_compatible_with(PortType::String));
        assert!(PortType::Number.is_compatible_with(PortType::Any));
    }

    #[test]
    fn different_types_not_compatible() {
        assert!(!PortType::String.is_compatible_with(PortType::Number));
        assert!(PortType::Array.is_compatible_with(PortType::Array));
    }

    #[test]
    fn accepts_checks_json_shape() {
        assert!(PortType::Object.accepts(&json!({"a": 1})));
        assert!(!PortType::Object.accepts(&json!([1])));
        assert!(PortType::Any.accepts(&JsonValue::Null));
    }

    #[test]
    fn input_port_parses_persisted_shape() {
        let port: InputPort = serde_json::from_value(json!({
            "name": "limit",
            "type": "number",
            "defaultValue": 10
        }))
        .expect("deserialize");

        assert_eq!(port.name, "limit");
        assert_eq!(port.port_type, PortType::Number);
        assert!(!port.required);
        assert_eq!(port.default_value, Some(json!(10)));
    }

    #[test]
    fn input_port_builders() {
        let port = InputPort::optional("config", PortType::Object).with_default(json!({}));
        assert!(!port.required);
        assert_eq!(port.default_value, Some(json!({})));
        assert!(InputPort::required("data", PortType::String).required);
    }
}
