// In-process servers assembled from capability handlers

use crate::protocol::JsonRpcError;
use mcphub_core::connection::{ConnectionError, ServerConnection};
use mcphub_core::CapabilityDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handler for a single capability
#[async_trait::async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Declaration sent to the host at registration
    fn descriptor(&self) -> CapabilityDescriptor;

    /// Execute with params that already passed the input schema
    async fn handle(&self, params: Value) -> Result<Value, ConnectionError>;
}

struct FnHandler<F> {
    descriptor: CapabilityDescriptor,
    func: F,
}

#[async_trait::async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ConnectionError>> + Send,
{
    fn descriptor(&self) -> CapabilityDescriptor {
        self.descriptor.clone()
    }

    async fn handle(&self, params: Value) -> Result<Value, ConnectionError> {
        (self.func)(params).await
    }
}

/// Build a handler from a descriptor and an async closure
pub fn handler_fn<F, Fut>(descriptor: CapabilityDescriptor, func: F) -> Arc<dyn CapabilityHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ConnectionError>> + Send + 'static,
{
    Arc::new(FnHandler { descriptor, func })
}

/// Server that runs inside the host process
pub struct LocalServer {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl LocalServer {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its descriptor's name
    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        let descriptor = handler.descriptor();
        self.handlers.insert(descriptor.name, handler);
    }

    pub fn with(mut self, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Descriptors for every registered handler, ordered by name
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<_> = self.handlers.values().map(|h| h.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ServerConnection for LocalServer {
    async fn invoke(
        &self,
        capability: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ConnectionError> {
        let handler = self.get(capability).ok_or_else(|| {
            let error = JsonRpcError::method_not_found(capability);
            ConnectionError::remote(error.code, error.message)
        })?;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Local handler {} abandoned after cancellation", capability);
                Err(ConnectionError::Transport("cancelled".to_string()))
            }
            result = handler.handle(params) => result,
        }
    }

    fn describe(&self) -> String {
        format!("in-process ({} capabilities)", self.handlers.len())
    }
}

// Helper functions for creating capability schemas

pub fn json_schema_object(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

pub fn json_schema_string(description: &str) -> Value {
    serde_json::json!({
        "type": "string",
        "description": description
    })
}

pub fn json_schema_number(description: &str) -> Value {
    serde_json::json!({
        "type": "number",
        "description": description
    })
}

pub fn json_schema_boolean(description: &str) -> Value {
    serde_json::json!({
        "type": "boolean",
        "description": description
    })
}

pub fn json_schema_array(items: Value, description: &str) -> Value {
    serde_json::json!({
        "type": "array",
        "items": items,
        "description": description
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcphub_core::schema::Schema;
    use serde_json::json;

    fn echo() -> Arc<dyn CapabilityHandler> {
        handler_fn(
            CapabilityDescriptor::tool(
                "say",
                json_schema_object(json!({"input": json_schema_string("Text")}), vec!["input"]),
            ),
            |params| async move { Ok(json!({"output": params["input"].clone()})) },
        )
    }

    #[tokio::test]
    async fn test_local_server_invokes_handler() {
        let server = LocalServer::new().with(echo());

        let result = server
            .invoke("say", json!({"input": "hi"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, json!({"output": "hi"}));
    }

    #[tokio::test]
    async fn test_unknown_capability_is_remote_error() {
        let server = LocalServer::new();
        let err = server
            .invoke("nope", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Remote { code: JsonRpcError::METHOD_NOT_FOUND, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let slow = handler_fn(CapabilityDescriptor::tool("wait", json!({})), |_| async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        let server = LocalServer::new().with(slow);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = server.invoke("wait", json!({}), cancel).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_schema_helpers_parse() {
        let schema = json_schema_object(
            json!({
                "tags": json_schema_array(json_schema_string("tag"), "Tags"),
                "limit": json_schema_number("Limit"),
                "verbose": json_schema_boolean("Verbose")
            }),
            vec!["tags"],
        );
        let parsed = Schema::from_json(&schema).unwrap();
        assert!(parsed.is_valid(&json!({"tags": ["a"], "limit": 3, "verbose": true})));
        assert!(!parsed.is_valid(&json!({"limit": 3})));
    }

    #[test]
    fn test_descriptors_sorted() {
        let server = LocalServer::new()
            .with(handler_fn(CapabilityDescriptor::tool("b", json!({})), |_| async {
                Ok(Value::Null)
            }))
            .with(handler_fn(CapabilityDescriptor::tool("a", json!({})), |_| async {
                Ok(Value::Null)
            }));

        let names: Vec<_> = server.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(server.contains("a"));
    }
}
