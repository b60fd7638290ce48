//! Request routing: the per-request protocol state machine.
//!
//! `RECEIVED -> VALIDATED -> AUTHORIZED -> DISPATCHED -> COMPLETED`, with early exits to
//! `REJECTED` at any gate and `FAILED` when the server errors or the transport gives up.
//! All gates run sequentially inside one task; the only suspension point that waits on
//! a server is the dispatch, and no internal lock is held across it.

use crate::protocol::{reply_id, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use mcphub_core::connection::ConnectionError;
use mcphub_core::consent::ConsentStore;
use mcphub_core::context::ContextStore;
use mcphub_core::events::{EventBus, EventType};
use mcphub_core::registry::{RegisteredServer, Registry};
use mcphub_core::{ClientId, HostError, ServerId};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Routing knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Applied to dispatches whose caller did not pass a timeout
    pub default_timeout: Duration,
    /// Extra attempts after a transport failure
    pub max_transport_retries: u32,
    /// First retry delay; doubles on every further attempt
    pub retry_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_transport_retries: 2,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Lifecycle state of an in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Validated,
    Authorized,
    Dispatched,
    Completed,
    Rejected,
    Failed,
}

/// What the router hands back to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// A well-formed JSON-RPC response for the client
    Delivered(JsonRpcResponse),
    /// The client cancelled; nothing is delivered for this id
    Discarded,
}

impl RouteOutcome {
    pub fn response(&self) -> Option<&JsonRpcResponse> {
        match self {
            Self::Delivered(response) => Some(response),
            Self::Discarded => None,
        }
    }

    pub fn into_response(self) -> Option<JsonRpcResponse> {
        match self {
            Self::Delivered(response) => Some(response),
            Self::Discarded => None,
        }
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// No such request is in flight
    NotFound,
    /// Cancelled before dispatch; the server never sees it
    BeforeDispatch,
    /// Already dispatched; the server-side handle was signalled, any late answer is dropped
    SignalledUpstream,
}

type InflightKey = (ClientId, RequestId);

struct InflightEntry {
    state: RequestState,
    cancel: CancellationToken,
}

/// Outstanding requests keyed by (client, id)
#[derive(Default)]
struct InflightTable {
    entries: Mutex<HashMap<InflightKey, InflightEntry>>,
}

impl InflightTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<InflightKey, InflightEntry>> {
        // Entries hold no invariants a panicking holder could break
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(self: &Arc<Self>, key: InflightKey) -> Result<InflightGuard, HostError> {
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return Err(HostError::DuplicateRequestId(key.1.to_string()));
        }

        let cancel = CancellationToken::new();
        entries.insert(
            key.clone(),
            InflightEntry {
                state: RequestState::Received,
                cancel: cancel.clone(),
            },
        );

        Ok(InflightGuard {
            table: Arc::clone(self),
            key,
            cancel,
        })
    }

    fn cancel(&self, key: &InflightKey) -> CancelOutcome {
        let entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return CancelOutcome::NotFound;
        };

        entry.cancel.cancel();
        match entry.state {
            RequestState::Received | RequestState::Validated | RequestState::Authorized => {
                CancelOutcome::BeforeDispatch
            }
            _ => CancelOutcome::SignalledUpstream,
        }
    }
}

/// Keeps a request registered as in flight; removes it when dropped
struct InflightGuard {
    table: Arc<InflightTable>,
    key: InflightKey,
    cancel: CancellationToken,
}

impl InflightGuard {
    fn advance(&self, state: RequestState) {
        if let Some(entry) = self.table.lock().get_mut(&self.key) {
            entry.state = state;
        }
        tracing::debug!("Request {}/{} -> {:?}", self.key.0, self.key.1, state);
    }

    /// Move to DISPATCHED unless a cancel already landed; atomic with `InflightTable::cancel`
    fn try_dispatch(&self) -> bool {
        let mut entries = self.table.lock();
        match entries.get_mut(&self.key) {
            Some(entry) if !entry.cancel.is_cancelled() => {
                entry.state = RequestState::Dispatched;
                true
            }
            _ => false,
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.key);
    }
}

/// Why a request stopped before a server result was obtained
enum Halt {
    Rejected(HostError),
    Failed(HostError),
    Cancelled { after_dispatch: bool },
}

/// Validates and forwards JSON-RPC calls from clients to servers
pub struct Router {
    registry: Arc<Registry>,
    consent: Arc<ConsentStore>,
    context: Arc<ContextStore>,
    events: EventBus,
    inflight: Arc<InflightTable>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        consent: Arc<ConsentStore>,
        context: Arc<ContextStore>,
        events: EventBus,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            consent,
            context,
            events,
            inflight: Arc::new(InflightTable::default()),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one raw envelope from `client_id`
    pub async fn route(
        &self,
        client_id: &ClientId,
        raw: Value,
        timeout: Option<Duration>,
    ) -> RouteOutcome {
        let started = Instant::now();

        // RECEIVED
        let request = match JsonRpcRequest::parse(&raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("Rejected malformed request from {}: {}", client_id, e);
                self.events.publish(EventType::RequestRejected {
                    client_id: client_id.clone(),
                    request_id: None,
                    method: None,
                    error_kind: e.kind().to_string(),
                });
                return RouteOutcome::Delivered(JsonRpcResponse::error(
                    reply_id(&raw),
                    JsonRpcError::from(&e),
                ));
            }
        };

        let guard = match self
            .inflight
            .begin((client_id.clone(), request.id.clone()))
        {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Client {} reused in-flight id {}", client_id, request.id);
                return RouteOutcome::Delivered(self.rejected(client_id, &request, e));
            }
        };

        let outcome = self.process(client_id, &request, &guard, timeout).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(result) => {
                guard.advance(RequestState::Completed);
                let response = JsonRpcResponse::success(request.id.clone(), result);
                // A client unregistered mid-flight must not get its context back
                if self.registry.mark_client_active(client_id).await {
                    self.context
                        .append_exchange(client_id, raw, response.to_value())
                        .await;
                }
                self.completed(client_id, &request, true, duration_ms);
                RouteOutcome::Delivered(response)
            }
            Err(Halt::Failed(e)) => {
                guard.advance(RequestState::Failed);
                tracing::warn!(
                    "Request {}/{} ({}) failed: {}",
                    client_id,
                    request.id,
                    request.method,
                    e
                );
                self.completed(client_id, &request, false, duration_ms);
                RouteOutcome::Delivered(JsonRpcResponse::error(
                    request.id.clone(),
                    JsonRpcError::from(&e),
                ))
            }
            Err(Halt::Rejected(e)) => {
                guard.advance(RequestState::Rejected);
                RouteOutcome::Delivered(self.rejected(client_id, &request, e))
            }
            Err(Halt::Cancelled { after_dispatch }) => {
                guard.advance(RequestState::Rejected);
                if after_dispatch {
                    tracing::info!(
                        "Request {}/{} cancelled after dispatch; late response discarded",
                        client_id,
                        request.id
                    );
                } else {
                    tracing::debug!("Request {}/{} cancelled before dispatch", client_id, request.id);
                }
                self.events.publish(EventType::RequestCancelled {
                    client_id: client_id.clone(),
                    request_id: request.id.to_string(),
                    after_dispatch,
                });
                RouteOutcome::Discarded
            }
        }
    }

    async fn process(
        &self,
        client_id: &ClientId,
        request: &JsonRpcRequest,
        guard: &InflightGuard,
        timeout: Option<Duration>,
    ) -> Result<Value, Halt> {
        // VALIDATED
        let (server_id, capability_name) = request.target().map_err(Halt::Rejected)?;

        self.registry
            .find_client(client_id)
            .await
            .map_err(Halt::Rejected)?;

        let server = self
            .registry
            .find_server(&server_id)
            .await
            .map_err(|_| Halt::Rejected(HostError::UnknownServer(server_id.clone())))?;

        let capability = server.capability(capability_name).ok_or_else(|| {
            Halt::Rejected(HostError::UnknownCapability {
                server_id: server_id.clone(),
                capability: capability_name.to_string(),
            })
        })?;

        let params = request.params.clone().unwrap_or_else(|| json!({}));
        capability
            .input_schema
            .validate(&params)
            .map_err(|v| Halt::Rejected(HostError::SchemaViolation(v.to_string())))?;
        guard.advance(RequestState::Validated);

        // AUTHORIZED
        if !self
            .consent
            .is_authorized(client_id, &server_id, capability)
            .await
        {
            return Err(Halt::Rejected(HostError::ConsentDenied {
                client_id: client_id.clone(),
                server_id: server_id.clone(),
                capability: capability_name.to_string(),
            }));
        }
        guard.advance(RequestState::Authorized);

        // DISPATCHED
        if !guard.try_dispatch() {
            return Err(Halt::Cancelled {
                after_dispatch: false,
            });
        }
        tracing::debug!("Request {}/{} -> Dispatched", client_id, request.id);

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let cancel = guard.cancel.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled { after_dispatch: true }),
            result = tokio::time::timeout(
                timeout,
                self.dispatch(&server, capability_name, params, cancel.clone()),
            ) => match result {
                Ok(Ok(value)) => {
                    self.registry.mark_active(&server_id).await;
                    match &capability.output_schema {
                        Some(schema) => match schema.validate(&value) {
                            Ok(()) => Ok(value),
                            Err(v) => Err(Halt::Failed(HostError::UpstreamError {
                                code: HostError::SCHEMA_VIOLATION,
                                message: format!("result violates output schema: {}", v),
                                data: None,
                            })),
                        },
                        None => Ok(value),
                    }
                }
                Ok(Err(e)) => Err(Halt::Failed(e)),
                Err(_) => Err(Halt::Failed(HostError::UpstreamTimeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })),
            },
        }
    }

    /// Forward to the server, retrying transport failures with exponential backoff
    async fn dispatch(
        &self,
        server: &RegisteredServer,
        capability: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, HostError> {
        let mut attempt: u32 = 0;

        loop {
            match server
                .connection
                .invoke(capability, params.clone(), cancel.clone())
                .await
            {
                Ok(value) => return Ok(value),
                Err(ConnectionError::Remote {
                    code,
                    message,
                    data,
                }) => {
                    return Err(HostError::UpstreamError {
                        code,
                        message,
                        data,
                    })
                }
                Err(ConnectionError::Transport(reason)) if cancel.is_cancelled() => {
                    return Err(HostError::TransportError(reason));
                }
                Err(ConnectionError::Transport(reason)) => {
                    attempt += 1;

                    if attempt > self.config.max_transport_retries {
                        self.server_unreachable(&server.id, &reason).await;
                        return Err(HostError::UpstreamError {
                            code: HostError::TRANSPORT_ERROR,
                            message: format!(
                                "server {} unreachable after {} attempt(s): {}",
                                server.id, attempt, reason
                            ),
                            data: None,
                        });
                    }

                    let backoff = self
                        .config
                        .retry_backoff
                        .saturating_mul(2_u32.saturating_pow(attempt - 1));
                    tracing::warn!(
                        "Transport failure calling {}.{}: {} (retry {} in {:?})",
                        server.id,
                        capability,
                        reason,
                        attempt,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn server_unreachable(&self, server_id: &ServerId, reason: &str) {
        if let Some(previous) = self.registry.mark_unreachable(server_id).await {
            if previous != mcphub_core::ServerStatus::Unreachable {
                self.events.publish(EventType::ServerUnreachable {
                    server_id: server_id.clone(),
                    error: reason.to_string(),
                });
            }
        }
    }

    fn rejected(
        &self,
        client_id: &ClientId,
        request: &JsonRpcRequest,
        error: HostError,
    ) -> JsonRpcResponse {
        tracing::debug!(
            "Request {}/{} ({}) rejected: {}",
            client_id,
            request.id,
            request.method,
            error
        );
        self.events.publish(EventType::RequestRejected {
            client_id: client_id.clone(),
            request_id: Some(request.id.to_string()),
            method: Some(request.method.clone()),
            error_kind: error.kind().to_string(),
        });
        JsonRpcResponse::error(request.id.clone(), JsonRpcError::from(&error))
    }

    fn completed(
        &self,
        client_id: &ClientId,
        request: &JsonRpcRequest,
        success: bool,
        duration_ms: u64,
    ) {
        self.events.publish(EventType::RequestCompleted {
            client_id: client_id.clone(),
            request_id: request.id.to_string(),
            method: request.method.clone(),
            success,
            duration_ms,
        });
    }

    /// Cancel an in-flight request
    pub fn cancel(&self, client_id: &ClientId, request_id: &RequestId) -> CancelOutcome {
        let outcome = self
            .inflight
            .cancel(&(client_id.clone(), request_id.clone()));
        tracing::debug!("Cancel {}/{}: {:?}", client_id, request_id, outcome);
        outcome
    }

    /// Cancel every in-flight request of a client; returns how many were signalled
    pub fn cancel_all(&self, client_id: &ClientId) -> usize {
        let entries = self.inflight.lock();
        let mut cancelled = 0;
        for ((owner, _), entry) in entries.iter() {
            if owner == client_id {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn state_of(&self, client_id: &ClientId, request_id: &RequestId) -> Option<RequestState> {
        self.inflight
            .lock()
            .get(&(client_id.clone(), request_id.clone()))
            .map(|e| e.state)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }
}
