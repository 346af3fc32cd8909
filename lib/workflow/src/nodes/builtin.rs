//! Entry, action, transform and condition executors.

use super::primary_output;
use crate::error::ExecutorError;
use crate::node::{ConditionConfig, ConditionOperator, NodeConfig};
use crate::registry::{NodeExecutor, NodeInvocation, NodeOutputs};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::BTreeMap;

fn wrong_config(invocation: &NodeInvocation, expected: &str) -> ExecutorError {
    ExecutorError::InvalidInput(format!(
        "expected {expected} configuration, got {}",
        invocation.node.kind()
    ))
}

/// Emits the run's input data, merged with any bound declared inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryExecutor;

#[async_trait]
impl NodeExecutor for EntryExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let mut payload = invocation.input_data.as_ref().clone();
        if let JsonValue::Object(fields) = &mut payload {
            for (name, value) in &invocation.inputs {
                fields.insert(name.clone(), value.clone());
            }
        }
        Ok(BTreeMap::from([(primary_output(&invocation.node), payload)]))
    }
}

/// Emits its input with the configured `set` fields merged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

#[async_trait]
impl NodeExecutor for ActionExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Action(config) = &invocation.node.config else {
            return Err(wrong_config(&invocation, "action"));
        };
        let mut value = invocation
            .primary_input()
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Map::new()));

        if !config.set.is_empty() {
            let JsonValue::Object(fields) = &mut value else {
                return Err(ExecutorError::InvalidInput(
                    "cannot set fields on a non-object input".to_string(),
                ));
            };
            for (key, field) in &config.set {
                fields.insert(key.clone(), field.clone());
            }
        }
        Ok(BTreeMap::from([(primary_output(&invocation.node), value)]))
    }
}

/// Builds an object from JSON-pointer mappings over its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Transform(config) = &invocation.node.config else {
            return Err(wrong_config(&invocation, "transform"));
        };
        let input = invocation.primary_input().cloned().unwrap_or(JsonValue::Null);

        let value = if config.mappings.is_empty() {
            input
        } else {
            let fields: Map<String, JsonValue> = config
                .mappings
                .iter()
                .map(|mapping| {
                    let picked = input.pointer(&mapping.source).cloned().unwrap_or(JsonValue::Null);
                    (mapping.target.clone(), picked)
                })
                .collect();
            JsonValue::Object(fields)
        };
        Ok(BTreeMap::from([(primary_output(&invocation.node), value)]))
    }
}

/// Tests a field of its input; emits the verdict on `result` and the input
/// on `value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Condition(config) = &invocation.node.config else {
            return Err(wrong_config(&invocation, "condition"));
        };
        let input = invocation.primary_input().cloned().unwrap_or(JsonValue::Null);
        let result = evaluate(config, &input)?;
        Ok(BTreeMap::from([
            ("result".to_string(), JsonValue::Bool(result)),
            ("value".to_string(), input),
        ]))
    }
}

fn evaluate(config: &ConditionConfig, input: &JsonValue) -> Result<bool, ExecutorError> {
    let field = input.pointer(&config.field).filter(|v| !v.is_null());
    let expected = &config.value;

    let Some(actual) = field else {
        return Ok(match config.operator {
            ConditionOperator::Ne => !expected.is_null(),
            ConditionOperator::Eq => expected.is_null(),
            _ => false,
        });
    };

    Ok(match config.operator {
        ConditionOperator::Exists => true,
        ConditionOperator::Eq => values_equal(actual, expected),
        ConditionOperator::Ne => !values_equal(actual, expected),
        ConditionOperator::Gt => compare(actual, expected)? == Ordering::Greater,
        ConditionOperator::Gte => compare(actual, expected)? != Ordering::Less,
        ConditionOperator::Lt => compare(actual, expected)? == Ordering::Less,
        ConditionOperator::Lte => compare(actual, expected)? != Ordering::Greater,
        ConditionOperator::Contains => contains(actual, expected),
    })
}

fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &JsonValue, b: &JsonValue) -> Result<Ordering, ExecutorError> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).ok_or_else(|| {
            ExecutorError::InvalidInput("cannot compare non-finite numbers".to_string())
        });
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Ok(x.cmp(y));
    }
    Err(ExecutorError::InvalidInput(format!(
        "cannot order {a} against {b}"
    )))
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match haystack {
        JsonValue::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        JsonValue::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        JsonValue::Object(fields) => needle.as_str().is_some_and(|key| fields.contains_key(key)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextView, ExecutionContext};
    use crate::node::{
        ActionConfig, FieldMapping, ManualConfig, Node, TransformConfig,
    };
    use autoflow_core::ExecutionId;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn invocation(node: Node, input: Option<JsonValue>, input_data: JsonValue) -> NodeInvocation {
        let inputs = match (input, node.inputs.first()) {
            (Some(value), Some(port)) => BTreeMap::from([(port.name.clone(), value)]),
            _ => BTreeMap::new(),
        };
        NodeInvocation {
            execution_id: ExecutionId::new(),
            node: Arc::new(node),
            inputs,
            input_data: Arc::new(input_data),
            context: ContextView::new(Arc::new(ExecutionContext::new()), BTreeSet::new()),
            cancel: CancellationToken::new(),
            attempt: 1,
        }
    }

    fn condition(field: &str, operator: ConditionOperator, value: JsonValue) -> Node {
        Node::new(
            "cond",
            "cond",
            NodeConfig::Condition(ConditionConfig {
                field: field.to_string(),
                operator,
                value,
            }),
        )
    }

    #[tokio::test]
    async fn entry_emits_input_data() {
        let node = Node::new("start", "start", NodeConfig::Manual(ManualConfig::default()));
        let outputs = EntryExecutor
            .execute(invocation(node, None, json!({"x": 1})))
            .await
            .expect("execute");
        assert_eq!(outputs.get("output"), Some(&json!({"x": 1})));
    }

    #[tokio::test]
    async fn action_merges_set_fields() {
        let mut set = Map::new();
        set.insert("seen".to_string(), json!(true));
        let node = Node::new("act", "act", NodeConfig::Action(ActionConfig { set }));
        let outputs = ActionExecutor
            .execute(invocation(node, Some(json!({"x": 1})), json!({})))
            .await
            .expect("execute");
        assert_eq!(outputs.get("output"), Some(&json!({"x": 1, "seen": true})));
    }

    #[tokio::test]
    async fn action_rejects_non_object_when_setting() {
        let mut set = Map::new();
        set.insert("seen".to_string(), json!(true));
        let node = Node::new("act", "act", NodeConfig::Action(ActionConfig { set }));
        let err = ActionExecutor
            .execute(invocation(node, Some(json!(5)), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn transform_applies_mappings() {
        let node = Node::new(
            "t",
            "t",
            NodeConfig::Transform(TransformConfig {
                mappings: vec![
                    FieldMapping {
                        target: "total".to_string(),
                        source: "/order/amount".to_string(),
                    },
                    FieldMapping {
                        target: "missing".to_string(),
                        source: "/nope".to_string(),
                    },
                ],
            }),
        );
        let outputs = TransformExecutor
            .execute(invocation(node, Some(json!({"order": {"amount": 42}})), json!({})))
            .await
            .expect("execute");
        assert_eq!(outputs.get("output"), Some(&json!({"total": 42, "missing": null})));
    }

    #[tokio::test]
    async fn transform_without_mappings_passes_through() {
        let node = Node::new("t", "t", NodeConfig::Transform(TransformConfig::default()));
        let outputs = TransformExecutor
            .execute(invocation(node, Some(json!([1, 2])), json!({})))
            .await
            .expect("execute");
        assert_eq!(outputs.get("output"), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn condition_outputs_result_and_value() {
        let node = condition("/amount", ConditionOperator::Gt, json!(100));
        let outputs = ConditionExecutor
            .execute(invocation(node, Some(json!({"amount": 150})), json!({})))
            .await
            .expect("execute");
        assert_eq!(outputs.get("result"), Some(&json!(true)));
        assert_eq!(outputs.get("value"), Some(&json!({"amount": 150})));
    }

    #[test]
    fn condition_operators() {
        let input = json!({"n": 5, "s": "hello", "tags": ["a", "b"]});
        let check = |field: &str, op, value| {
            let config = ConditionConfig {
                field: field.to_string(),
                operator: op,
                value,
            };
            evaluate(&config, &input).expect("evaluate")
        };

        assert!(check("/n", ConditionOperator::Eq, json!(5.0)));
        assert!(check("/n", ConditionOperator::Ne, json!(6)));
        assert!(check("/n", ConditionOperator::Gte, json!(5)));
        assert!(check("/n", ConditionOperator::Lt, json!(10)));
        assert!(!check("/n", ConditionOperator::Lte, json!(4)));
        assert!(check("/s", ConditionOperator::Contains, json!("ell")));
        assert!(check("/tags", ConditionOperator::Contains, json!("b")));
        assert!(check("/s", ConditionOperator::Exists, JsonValue::Null));
        assert!(!check("/absent", ConditionOperator::Exists, JsonValue::Null));
        assert!(!check("/absent", ConditionOperator::Gt, json!(1)));
    }

    #[test]
    fn ordering_mixed_types_is_invalid() {
        let config = ConditionConfig {
            field: "/s".to_string(),
            operator: ConditionOperator::Gt,
            value: json!(1),
        };
        assert!(evaluate(&config, &json!({"s": "x"})).is_err());
    }
}
