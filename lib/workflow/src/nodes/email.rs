//! Outgoing mail handed to a host-supplied [`Mailer`].

use super::primary_output;
use crate::error::ExecutorError;
use crate::node::NodeConfig;
use crate::registry::{NodeExecutor, NodeInvocation, NodeOutputs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A rendered message handed to the mailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Delivers mail for `email` nodes.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the message and returns a delivery receipt.
    async fn send(&self, message: EmailMessage) -> Result<JsonValue, ExecutorError>;
}

/// Renders the configured message from its input and sends it.
#[derive(Clone)]
pub struct EmailExecutor {
    mailer: Arc<dyn Mailer>,
}

impl EmailExecutor {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl NodeExecutor for EmailExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Email(config) = &invocation.node.config else {
            return Err(ExecutorError::InvalidInput(format!(
                "expected email configuration, got {}",
                invocation.node.kind()
            )));
        };
        if config.to.is_empty() {
            return Err(ExecutorError::InvalidInput("no recipients".to_string()));
        }
        let input = invocation.primary_input().cloned().unwrap_or(JsonValue::Null);
        let message = EmailMessage {
            to: config.to.clone(),
            subject: render(&config.subject, &input),
            body: render(&config.body, &input),
        };

        let receipt = tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => return Err(ExecutorError::Cancelled),
            receipt = self.mailer.send(message) => receipt?,
        };
        Ok(BTreeMap::from([(primary_output(&invocation.node), receipt)]))
    }
}

/// Replaces `{{path.to.field}}` with the matching input value. Missing
/// fields render as empty strings; strings render without quotes.
fn render(template: &str, input: &JsonValue) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let path = after[..end].trim();
        let value = path
            .split('.')
            .try_fold(input, |value, key| value.get(key));
        match value {
            Some(JsonValue::String(s)) => out.push_str(s),
            Some(JsonValue::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextView, ExecutionContext};
    use crate::node::{EmailConfig, Node};
    use autoflow_core::ExecutionId;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl Mailer for Outbox {
        async fn send(&self, message: EmailMessage) -> Result<JsonValue, ExecutorError> {
            self.sent.lock().unwrap().push(message);
            Ok(json!({"id": "msg-1"}))
        }
    }

    #[test]
    fn renders_placeholders() {
        let input = json!({"name": "Ada", "order": {"total": 42}});
        assert_eq!(
            render("Hi {{ name }}, total {{order.total}}{{missing}}!", &input),
            "Hi Ada, total 42!"
        );
        assert_eq!(render("open {{ brace", &input), "open {{ brace");
    }

    #[tokio::test]
    async fn sends_rendered_message() {
        let outbox = Arc::new(Outbox::default());
        let node = Node::new(
            "mail",
            "mail",
            NodeConfig::Email(EmailConfig {
                to: vec!["ops@example.com".to_string()],
                subject: "Order {{id}}".to_string(),
                body: "Total: {{total}}".to_string(),
            }),
        );
        let invocation = NodeInvocation {
            execution_id: ExecutionId::new(),
            node: Arc::new(node),
            inputs: BTreeMap::from([("input".to_string(), json!({"id": "o-7", "total": 10}))]),
            input_data: Arc::new(JsonValue::Null),
            context: ContextView::new(Arc::new(ExecutionContext::new()), BTreeSet::new()),
            cancel: CancellationToken::new(),
            attempt: 1,
        };

        let outputs = EmailExecutor::new(outbox.clone())
            .execute(invocation)
            .await
            .expect("execute");

        assert_eq!(outputs.get("receipt"), Some(&json!({"id": "msg-1"})));
        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Order o-7");
        assert_eq!(sent[0].body, "Total: 10");
    }
}
