use super::{status_for, ApiResult};
use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mcphub_core::consent::ConsentRecord;
use mcphub_core::context::Context;
use mcphub_core::{CapabilityDescriptor, ClientId, ClientInfo, HostError, ServerId, ServerInfo};
use mcphub_mcp::{
    CancelOutcome, HttpConnection, JsonRpcError, JsonRpcResponse, RegistrationResponse, RequestId,
    RouteOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn registration_reply<T>(result: &Result<T, HostError>) -> Response {
    let status = match result {
        Ok(_) => StatusCode::CREATED,
        Err(e) => status_for(e),
    };
    (status, Json(RegistrationResponse::from_result(result))).into_response()
}

// Servers

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterServerRequest {
    pub id: ServerId,
    /// JSON-RPC endpoint the host forwards calls to
    pub endpoint: Url,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
}

/// Register (or re-register) a remote server
pub async fn register_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterServerRequest>,
) -> Response {
    let connection = Arc::new(HttpConnection::new(req.endpoint));
    let result = state
        .host
        .register_server(req.id.clone(), req.capabilities, connection)
        .await;

    if let Err(e) = &result {
        tracing::warn!("Rejected registration of server {}: {}", req.id, e);
    }
    registration_reply(&result)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListServersResponse {
    pub servers: Vec<ServerInfo>,
}

pub async fn list_servers(State(state): State<Arc<AppState>>) -> Json<ListServersResponse> {
    let servers = state.host.list_servers().await.to_vec();
    Json(ListServersResponse { servers })
}

pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> ApiResult<Json<ServerInfo>> {
    Ok(Json(state.host.find_server(&ServerId::new(server_id)).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemovedResponse {
    pub removed: bool,
}

pub async fn unregister_server(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> Json<RemovedResponse> {
    let removed = state.host.unregister_server(&ServerId::new(server_id)).await;
    Json(RemovedResponse { removed })
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.host.heartbeat(&ServerId::new(server_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceUpdatedResponse {
    pub subscribers: Vec<ClientId>,
}

/// A server reports that one of its resources changed
pub async fn resource_updated(
    State(state): State<Arc<AppState>>,
    Path((server_id, resource)): Path<(String, String)>,
) -> ApiResult<Json<ResourceUpdatedResponse>> {
    let subscribers = state
        .host
        .notify_resource_updated(&ServerId::new(server_id), &resource)
        .await?;
    Ok(Json(ResourceUpdatedResponse { subscribers }))
}

// Clients

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub id: ClientId,
}

pub async fn register_client(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterClientRequest>,
) -> Response {
    let result = state.host.register_client(req.id).await;
    registration_reply(&result)
}

pub async fn unregister_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<RemovedResponse> {
    let removed = state.host.unregister_client(&ClientId::new(client_id)).await;
    Json(RemovedResponse { removed })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListClientsResponse {
    pub clients: Vec<ClientInfo>,
}

pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<ListClientsResponse> {
    let clients = state.host.list_clients().await.to_vec();
    Json(ListClientsResponse { clients })
}

pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<Context>> {
    Ok(Json(state.host.context(&ClientId::new(client_id)).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListConsentsResponse {
    pub consents: Vec<ConsentRecord>,
}

pub async fn list_consents(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<ListConsentsResponse> {
    let consents = state.host.list_consents(&ClientId::new(client_id)).await;
    Json(ListConsentsResponse { consents })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub server_id: ServerId,
    pub resource: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub changed: bool,
}

pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(req): Json<SubscriptionRequest>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let changed = state
        .host
        .subscribe_resource(&ClientId::new(client_id), &req.server_id, &req.resource)
        .await?;
    Ok(Json(SubscriptionResponse { changed }))
}

pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(req): Json<SubscriptionRequest>,
) -> Json<SubscriptionResponse> {
    let changed = state
        .host
        .unsubscribe_resource(&ClientId::new(client_id), &req.server_id, &req.resource)
        .await;
    Json(SubscriptionResponse { changed })
}

// Consent

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantConsentRequest {
    pub client_id: ClientId,
    pub server_id: ServerId,
    pub capability: String,
    pub grantor: Option<String>,
}

pub async fn grant_consent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GrantConsentRequest>,
) -> ApiResult<(StatusCode, Json<ConsentRecord>)> {
    let grantor = req.grantor.unwrap_or_else(|| "user".to_string());
    let record = state
        .host
        .grant_consent(req.client_id, req.server_id, &req.capability, &grantor)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_consent(
    State(state): State<Arc<AppState>>,
    Path(consent_id): Path<String>,
) -> ApiResult<Json<ConsentRecord>> {
    Ok(Json(state.host.consent(&consent_id).await?))
}

pub async fn revoke_consent(
    State(state): State<Arc<AppState>>,
    Path(consent_id): Path<String>,
) -> ApiResult<Json<ConsentRecord>> {
    Ok(Json(state.host.revoke_consent(&consent_id).await?))
}

// JSON-RPC

#[derive(Debug, Deserialize)]
pub struct RpcQuery {
    /// Overrides the default dispatch timeout
    pub timeout_ms: Option<u64>,
}

/// Route one JSON-RPC call; 204 when the client cancelled it meanwhile
pub async fn rpc(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(query): Query<RpcQuery>,
    body: Bytes,
) -> Response {
    let client_id = ClientId::new(client_id);

    // Unparsable bodies still get a JSON-RPC reply rather than an HTTP rejection
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("Unparsable JSON-RPC body from client {}: {}", client_id, e);
            return Json(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::parse_error(e),
            ))
            .into_response();
        }
    };

    let outcome = match query.timeout_ms {
        Some(ms) => {
            state
                .host
                .call_with_timeout(&client_id, raw, Duration::from_millis(ms))
                .await
        }
        None => state.host.call(&client_id, raw).await,
    };

    match outcome {
        RouteOutcome::Delivered(response) => Json(response).into_response(),
        RouteOutcome::Discarded => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelRequest {
    pub id: RequestId,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub outcome: CancelOutcome,
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Json<CancelResponse> {
    let outcome = state.host.cancel(&ClientId::new(client_id), &req.id);
    Json(CancelResponse { outcome })
}
