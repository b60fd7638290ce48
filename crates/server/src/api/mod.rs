use crate::config::{AppState, HostConfig};
use crate::websocket;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use mcphub_core::HostError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server; returns once `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Servers
        .route(
            "/api/servers",
            get(handlers::list_servers).post(handlers::register_server),
        )
        .route(
            "/api/servers/{server_id}",
            get(handlers::get_server).delete(handlers::unregister_server),
        )
        .route(
            "/api/servers/{server_id}/heartbeat",
            post(handlers::heartbeat),
        )
        .route(
            "/api/servers/{server_id}/resources/{resource}/updated",
            post(handlers::resource_updated),
        )
        // Clients
        .route(
            "/api/clients",
            get(handlers::list_clients).post(handlers::register_client),
        )
        .route(
            "/api/clients/{client_id}",
            delete(handlers::unregister_client),
        )
        .route(
            "/api/clients/{client_id}/context",
            get(handlers::get_context),
        )
        .route(
            "/api/clients/{client_id}/consents",
            get(handlers::list_consents),
        )
        .route(
            "/api/clients/{client_id}/subscriptions",
            post(handlers::subscribe).delete(handlers::unsubscribe),
        )
        // Consent
        .route("/api/consents", post(handlers::grant_consent))
        .route(
            "/api/consents/{consent_id}",
            get(handlers::get_consent).delete(handlers::revoke_consent),
        )
        // JSON-RPC
        .route("/rpc/{client_id}", post(handlers::rpc))
        .route("/rpc/{client_id}/cancel", post(handlers::cancel))
        // Events
        .route("/api/events", get(websocket::ws_handler))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mcphub",
        "hostId": state.host.host_id(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            details: Some(details.into()),
        }
    }
}

/// Custom error type for API handlers
pub struct ApiError(anyhow::Error);

fn status_for(err: &HostError) -> StatusCode {
    match err {
        HostError::MalformedRequest(_)
        | HostError::InvalidId(_)
        | HostError::InvalidCapability(_)
        | HostError::SchemaViolation(_) => StatusCode::BAD_REQUEST,
        HostError::NotFound(_)
        | HostError::UnknownServer(_)
        | HostError::UnknownCapability { .. } => StatusCode::NOT_FOUND,
        HostError::ConsentDenied { .. } => StatusCode::FORBIDDEN,
        HostError::DuplicateId(_) | HostError::DuplicateRequestId(_) => StatusCode::CONFLICT,
        HostError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        HostError::UpstreamError { .. } | HostError::TransportError(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(host_error) = self.0.downcast_ref::<HostError>() {
            let response = ErrorResponse {
                error: host_error.to_string(),
                code: Some(host_error.code()),
                details: None,
            };
            return (status_for(host_error), Json(response)).into_response();
        }

        let error_msg = self.0.to_string();
        let details = self.0.chain().skip(1).map(|e| e.to_string()).collect::<Vec<_>>().join(": ");

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mcphub_core::{CapabilityDescriptor, ClientId, ServerId};
    use mcphub_mcp::upstream::{json_schema_object, json_schema_string};
    use mcphub_mcp::{handler_fn, JsonRpcError, LocalServer};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn state_with_echo() -> AppState {
        let state = AppState::new(&HostConfig::default());
        let say = CapabilityDescriptor::tool(
            "say",
            json_schema_object(json!({"input": json_schema_string("Text")}), vec!["input"]),
        );
        let server = LocalServer::new().with(handler_fn(say.clone(), |params| async move {
            Ok(json!({"output": params["input"].clone()}))
        }));
        state
            .host
            .register_server(ServerId::new("echo-srv"), vec![say], Arc::new(server))
            .await
            .unwrap();
        state
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };
        send_raw(app, method, uri, body).await
    }

    async fn send_raw(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(AppState::new(&HostConfig::default()));
        let (status, body) = send(app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["hostId"], "mcphub");
    }

    #[tokio::test]
    async fn test_client_consent_and_rpc_flow() {
        let state = state_with_echo().await;
        let app = create_router(state.clone());

        let (status, body) =
            send(app.clone(), "POST", "/api/clients", Some(json!({"id": "c1"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "registered");

        let rpc = json!({"jsonrpc": "2.0", "id": "1", "method": "echo-srv.say", "params": {"input": "hi"}});
        let (status, body) = send(app.clone(), "POST", "/rpc/c1", Some(rpc.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], HostError::CONSENT_DENIED);

        let (status, consent) = send(
            app.clone(),
            "POST",
            "/api/consents",
            Some(json!({"clientId": "c1", "serverId": "echo-srv", "capability": "say", "grantor": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = send(app.clone(), "POST", "/rpc/c1", Some(rpc.clone())).await;
        assert_eq!(body, json!({"jsonrpc": "2.0", "id": "1", "result": {"output": "hi"}}));

        let (_, context) = send(app.clone(), "GET", "/api/clients/c1/context", None).await;
        assert_eq!(context["history"].as_array().unwrap().len(), 1);

        let consent_id = consent["consent_id"].as_str().unwrap().to_string();
        let (status, _) = send(
            app.clone(),
            "DELETE",
            &format!("/api/consents/{}", consent_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(app, "POST", "/rpc/c1", Some(rpc)).await;
        assert_eq!(body["error"]["code"], HostError::CONSENT_DENIED);
    }

    #[tokio::test]
    async fn test_rpc_unparsable_body_gets_parse_error() {
        let state = state_with_echo().await;
        state.host.register_client(ClientId::new("c1")).await.unwrap();
        let app = create_router(state.clone());

        let (status, body) = send_raw(app, "POST", "/rpc/c1", Body::from("{not json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], Value::Null);
        assert_eq!(body["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert!(body.get("result").is_none());

        let context = state.host.context(&ClientId::new("c1")).await.unwrap();
        assert!(context.history.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_client_conflicts() {
        let state = state_with_echo().await;
        state.host.register_client(ClientId::new("c1")).await.unwrap();
        let app = create_router(state);

        let (status, body) = send(app, "POST", "/api/clients", Some(json!({"id": "c1"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "rejected");
    }

    #[tokio::test]
    async fn test_host_errors_map_to_status_codes() {
        let app = create_router(state_with_echo().await);

        let (status, body) = send(app.clone(), "POST", "/api/servers/nope/heartbeat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], HostError::NOT_FOUND);

        let (status, _) = send(app.clone(), "DELETE", "/api/consents/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, "POST", "/api/servers/echo-srv/heartbeat", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_register_remote_server() {
        let app = create_router(AppState::new(&HostConfig::default()));

        let registration = json!({
            "id": "remote",
            "endpoint": "http://127.0.0.1:9/rpc",
            "capabilities": [{"kind": "tool", "name": "ping"}]
        });
        let (status, body) = send(app.clone(), "POST", "/api/servers", Some(registration)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"status": "registered"}));

        let bad = json!({
            "id": "remote2",
            "endpoint": "http://127.0.0.1:9/rpc",
            "capabilities": [{"kind": "prompt", "name": "ping"}]
        });
        let (status, body) = send(app.clone(), "POST", "/api/servers", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "rejected");

        let (_, body) = send(app, "GET", "/api/servers", None).await;
        assert_eq!(body["servers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request() {
        let state = state_with_echo().await;
        state.host.register_client(ClientId::new("c1")).await.unwrap();
        let app = create_router(state);

        let (status, body) = send(app, "POST", "/rpc/c1/cancel", Some(json!({"id": 5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "not_found");
    }
}
