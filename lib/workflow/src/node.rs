//! Workflow node types and configurations.
//!
//! Every node has:
//! - An identifier, unique within its workflow
//! - A kind from a closed set, carried by its strongly typed configuration
//! - Declared input and output ports
//! - Optional per-node timeout and retry overrides
//!
//! Nodes are persisted as `{ id, name, type, data, inputs, outputs }`; the
//! `type`/`data` pair is decoded into [`NodeConfig`] so dispatch never
//! inspects strings.

use crate::port::{InputPort, OutputPort, PortType};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Identifier for a node within a workflow.
///
/// Ordering is lexicographic and is the tie-break the scheduler uses when
/// several nodes become ready together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random node ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Transform,
    Webhook,
    Http,
    Database,
    Email,
    Schedule,
    Manual,
}

impl NodeKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Trigger,
        Self::Action,
        Self::Condition,
        Self::Transform,
        Self::Webhook,
        Self::Http,
        Self::Database,
        Self::Email,
        Self::Schedule,
        Self::Manual,
    ];

    /// Returns the persisted name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Condition => "condition",
            Self::Transform => "transform",
            Self::Webhook => "webhook",
            Self::Http => "http",
            Self::Database => "database",
            Self::Email => "email",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        }
    }

    /// Returns true for kinds that start a workflow and emit the execution
    /// input data.
    #[must_use]
    pub fn is_entry_kind(self) -> bool {
        matches!(
            self,
            Self::Trigger | Self::Webhook | Self::Schedule | Self::Manual
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for generic trigger nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Name of the event that fires this trigger, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// Configuration for manually started workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualConfig {}

/// Configuration for cron-style scheduled triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron expression (e.g., "0 7 * * *").
    pub cron: String,
    /// Timezone for the schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// HTTP method used by webhook and HTTP nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Configuration for inbound webhook triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The webhook path (e.g., "/hooks/orders").
    pub path: String,
    /// Accepted method.
    #[serde(default = "default_webhook_method")]
    pub method: HttpMethod,
}

fn default_webhook_method() -> HttpMethod {
    HttpMethod::Post
}

/// Configuration for action nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Fields merged into the input object.
    pub set: Map<String, JsonValue>,
}

/// Comparison applied by a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// JSON pointer into the input (empty string selects the whole input).
    #[serde(default)]
    pub field: String,
    /// The comparison to apply.
    pub operator: ConditionOperator,
    /// Right-hand operand.
    #[serde(default)]
    pub value: JsonValue,
}

/// A single field mapping for transform nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name in the produced object.
    pub target: String,
    /// JSON pointer into the input.
    pub source: String,
}

/// Configuration for transform nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Mappings producing the output object; empty passes input through.
    pub mappings: Vec<FieldMapping>,
}

/// Configuration for outbound HTTP request nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Request URL.
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Treat non-2xx responses as success.
    #[serde(default)]
    pub allow_error_status: bool,
}

/// Configuration for database query nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// The query to run; positional parameters come from the `params` input.
    pub query: String,
}

/// Configuration for email nodes.
///
/// `subject` and `body` may reference input fields as `{{field}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Configuration for a node, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    Condition(ConditionConfig),
    Transform(TransformConfig),
    Webhook(WebhookConfig),
    Http(HttpConfig),
    Database(DatabaseConfig),
    Email(EmailConfig),
    Schedule(ScheduleConfig),
    Manual(ManualConfig),
}

impl NodeConfig {
    /// Decodes a persisted `type` + `data` pair.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` does not match the configuration shape of
    /// the kind.
    pub fn from_parts(kind: NodeKind, data: JsonValue) -> Result<Self, serde_json::Error> {
        let data = if data.is_null() { json!({}) } else { data };
        serde_json::from_value(json!({ "type": kind, "data": data }))
    }

    /// Returns the kind of this configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger(_) => NodeKind::Trigger,
            Self::Action(_) => NodeKind::Action,
            Self::Condition(_) => NodeKind::Condition,
            Self::Transform(_) => NodeKind::Transform,
            Self::Webhook(_) => NodeKind::Webhook,
            Self::Http(_) => NodeKind::Http,
            Self::Database(_) => NodeKind::Database,
            Self::Email(_) => NodeKind::Email,
            Self::Schedule(_) => NodeKind::Schedule,
            Self::Manual(_) => NodeKind::Manual,
        }
    }

    /// Returns the persisted `data` payload.
    #[must_use]
    pub fn data(&self) -> JsonValue {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut tagged| tagged.get_mut("data").map(JsonValue::take))
            .unwrap_or_else(|| json!({}))
    }

    /// Generates the default ports for this configuration.
    fn default_ports(&self) -> (Vec<InputPort>, Vec<OutputPort>) {
        match self.kind() {
            NodeKind::Trigger | NodeKind::Webhook | NodeKind::Schedule | NodeKind::Manual => {
                (vec![], vec![OutputPort::new("output", PortType::Any)])
            }
            NodeKind::Action => (
                vec![InputPort::optional("input", PortType::Any)],
                vec![OutputPort::new("output", PortType::Any)],
            ),
            NodeKind::Transform => (
                vec![InputPort::required("input", PortType::Any)],
                vec![OutputPort::new("output", PortType::Any)],
            ),
            NodeKind::Condition => (
                vec![InputPort::required("input", PortType::Any)],
                vec![
                    OutputPort::new("result", PortType::Boolean),
                    OutputPort::new("value", PortType::Any),
                ],
            ),
            NodeKind::Http => (
                vec![InputPort::optional("body", PortType::Any)],
                vec![OutputPort::new("response", PortType::Object)],
            ),
            NodeKind::Database => (
                vec![InputPort::optional("params", PortType::Array)],
                vec![OutputPort::new("rows", PortType::Array)],
            ),
            NodeKind::Email => (
                vec![InputPort::optional("input", PortType::Any)],
                vec![OutputPort::new("receipt", PortType::Object)],
            ),
        }
    }
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeDefinition", into = "NodeDefinition")]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// Node configuration (determines kind and behavior).
    pub config: NodeConfig,
    /// Input ports for this node.
    pub inputs: Vec<InputPort>,
    /// Output ports for this node.
    pub outputs: Vec<OutputPort>,
    /// Per-invocation timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retry policy override.
    pub retry: Option<RetryPolicy>,
}

impl Node {
    /// Creates a new node with the default ports of its kind.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, config: NodeConfig) -> Self {
        let (inputs, outputs) = config.default_ports();
        Self {
            id: id.into(),
            name: name.into(),
            config,
            inputs,
            outputs,
            timeout_ms: None,
            retry: None,
        }
    }

    /// Replaces the declared input ports.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<InputPort>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Replaces the declared output ports.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Vec<OutputPort>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the kind of this node.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns the input port with the given name, if any.
    #[must_use]
    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Returns the output port with the given name, if any.
    #[must_use]
    pub fn output_port(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// The persisted shape of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeDefinition {
    id: NodeId,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    inputs: Vec<InputPort>,
    #[serde(default)]
    outputs: Vec<OutputPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryPolicy>,
}

impl TryFrom<NodeDefinition> for Node {
    type Error = String;

    fn try_from(def: NodeDefinition) -> Result<Self, Self::Error> {
        let config = NodeConfig::from_parts(def.kind, def.data)
            .map_err(|e| format!("invalid {} configuration for node {}: {e}", def.kind, def.id))?;
        let (default_inputs, default_outputs) = config.default_ports();
        // Each side falls back to the kind's ports when none are declared.
        let inputs = if def.inputs.is_empty() {
            default_inputs
        } else {
            def.inputs
        };
        let outputs = if def.outputs.is_empty() {
            default_outputs
        } else {
            def.outputs
        };
        Ok(Self {
            id: def.id,
            name: def.name,
            config,
            inputs,
            outputs,
            timeout_ms: def.timeout_ms,
            retry: def.retry,
        })
    }
}

impl From<Node> for NodeDefinition {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            name: node.name,
            kind: node.config.kind(),
            data: node.config.data(),
            inputs: node.inputs,
            outputs: node.outputs,
            timeout_ms: node.timeout_ms,
            retry: node.retry,
        }
    }
}
