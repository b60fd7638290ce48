// Remote servers reached over HTTP, one JSON-RPC POST per call

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use mcphub_core::connection::{ConnectionError, ServerConnection};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Connection to a server exposing a JSON-RPC 2.0 HTTP endpoint
pub struct HttpConnection {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpConnection {
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<Value, ConnectionError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| ConnectionError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConnectionError::Transport(format!("failed to read response: {}", e)))?;

        let parsed = serde_json::from_slice::<JsonRpcResponse>(&bytes);

        // Servers often pair a JSON-RPC error body with a 4xx/5xx status
        if !status.is_success() {
            return Err(match parsed {
                Ok(JsonRpcResponse {
                    error: Some(error), ..
                }) => remote(error),
                _ => ConnectionError::Transport(format!(
                    "server answered HTTP {}",
                    status.as_u16()
                )),
            });
        }

        let body = parsed
            .map_err(|e| ConnectionError::Transport(format!("invalid response body: {}", e)))?;
        if let Some(error) = body.error {
            return Err(remote(error));
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

fn remote(error: JsonRpcError) -> ConnectionError {
    ConnectionError::Remote {
        code: error.code,
        message: error.message,
        data: error.data,
    }
}

#[async_trait::async_trait]
impl ServerConnection for HttpConnection {
    async fn invoke(
        &self,
        capability: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ConnectionError> {
        // Upstream ids are ours; the client's id never leaves the host
        let request = JsonRpcRequest::new(
            RequestId::String(uuid::Uuid::new_v4().to_string()),
            capability,
            params,
        );

        tracing::debug!(
            "POST {} method={} upstream_id={}",
            self.endpoint,
            capability,
            request.id
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the request future aborts the HTTP exchange
                Err(ConnectionError::Transport("cancelled".to_string()))
            }
            result = self.post(&request) => result,
        }
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connection(server: &MockServer) -> HttpConnection {
        HttpConnection::new(Url::parse(&server.uri()).unwrap())
    }

    #[tokio::test]
    async fn test_success_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "say", "params": {"input": "hi"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "result": {"output": "hi"}
            })))
            .mount(&server)
            .await;

        let result = connection(&server)
            .await
            .invoke("say", json!({"input": "hi"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, json!({"output": "hi"}));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "error": {"code": 42, "message": "boom", "data": {"why": "test"}}
            })))
            .mount(&server)
            .await;

        let err = connection(&server)
            .await
            .invoke("say", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::Remote {
                code: 42,
                message: "boom".to_string(),
                data: Some(json!({"why": "test"})),
            }
        );
    }

    #[tokio::test]
    async fn test_http_failure_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = connection(&server)
            .await
            .invoke("say", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_http_failure_with_rpc_error_is_remote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "error": {"code": -32000, "message": "tool crashed"}
            })))
            .mount(&server)
            .await;

        let err = connection(&server)
            .await
            .invoke("say", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::Remote {
                code: -32000,
                message: "tool crashed".to_string(),
                data: None,
            }
        );
    }

    #[tokio::test]
    async fn test_http_failure_without_rpc_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "x",
                "result": {"output": "stale"}
            })))
            .mount(&server)
            .await;

        let err = connection(&server)
            .await
            .invoke("say", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_garbage_body_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = connection(&server)
            .await
            .invoke("say", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
