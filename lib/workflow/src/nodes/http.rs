//! Outbound HTTP requests through a shared `reqwest` client.

use super::primary_output;
use crate::error::ExecutorError;
use crate::node::{HttpMethod, NodeConfig};
use crate::registry::{NodeExecutor, NodeInvocation, NodeOutputs};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tracing::debug;

/// Performs the configured HTTP request.
///
/// The `body` input, when present, is sent as JSON. The response is emitted
/// as `{ status, body }`; the body is parsed as JSON when possible and kept
/// as a string otherwise.
#[derive(Debug, Clone, Default)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn external(message: impl Into<String>) -> ExecutorError {
    ExecutorError::External {
        service: "http".to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(&self, invocation: NodeInvocation) -> Result<NodeOutputs, ExecutorError> {
        let NodeConfig::Http(config) = &invocation.node.config else {
            return Err(ExecutorError::InvalidInput(format!(
                "expected http configuration, got {}",
                invocation.node.kind()
            )));
        };

        let mut request = self.client.request(method(config.method), &config.url);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = invocation.input("body").filter(|b| !b.is_null()) {
            request = request.json(body);
        }

        debug!(
            execution_id = %invocation.execution_id,
            node_id = %invocation.node.id,
            url = %config.url,
            "sending http request"
        );

        let send = async {
            let response = request.send().await.map_err(|e| external(e.to_string()))?;
            let status = response.status();
            let text = response.text().await.map_err(|e| external(e.to_string()))?;
            Ok::<_, ExecutorError>((status, text))
        };

        let (status, text) = tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => return Err(ExecutorError::Cancelled),
            result = send => result?,
        };

        if !status.is_success() && !config.allow_error_status {
            return Err(external(format!(
                "{} {} returned {status}",
                method(config.method),
                config.url
            )));
        }

        let body = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));
        Ok(BTreeMap::from([(
            primary_output(&invocation.node),
            json!({ "status": status.as_u16(), "body": body }),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextView, ExecutionContext};
    use crate::node::{HttpConfig, Node};
    use autoflow_core::ExecutionId;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    /// Serves one canned response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/")
    }

    fn invocation(url: String, allow_error_status: bool, cancel: CancellationToken) -> NodeInvocation {
        let node = Node::new(
            "fetch",
            "fetch",
            NodeConfig::Http(HttpConfig {
                url,
                method: HttpMethod::Get,
                headers: BTreeMap::new(),
                allow_error_status,
            }),
        );
        NodeInvocation {
            execution_id: ExecutionId::new(),
            node: Arc::new(node),
            inputs: BTreeMap::new(),
            input_data: Arc::new(JsonValue::Null),
            context: ContextView::new(Arc::new(ExecutionContext::new()), BTreeSet::new()),
            cancel,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn emits_status_and_parsed_body() {
        let url = serve_once("200 OK", r#"{"ok":true}"#).await;
        let outputs = HttpExecutor::new()
            .execute(invocation(url, false, CancellationToken::new()))
            .await
            .expect("execute");
        assert_eq!(
            outputs.get("response"),
            Some(&json!({"status": 200, "body": {"ok": true}}))
        );
    }

    #[tokio::test]
    async fn error_status_fails_unless_allowed() {
        let url = serve_once("500 Internal Server Error", r#"{"ok":false}"#).await;
        let err = HttpExecutor::new()
            .execute(invocation(url, false, CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::External { .. }));

        let url = serve_once("404 Not Found", "missing").await;
        let outputs = HttpExecutor::new()
            .execute(invocation(url, true, CancellationToken::new()))
            .await
            .expect("execute");
        assert_eq!(
            outputs.get("response"),
            Some(&json!({"status": 404, "body": "missing"}))
        );
    }

    #[tokio::test]
    async fn observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Nothing listens here; cancellation wins before any connection error.
        let err = HttpExecutor::new()
            .execute(invocation("http://127.0.0.1:9/".to_string(), false, cancel))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::Cancelled);
    }
}
