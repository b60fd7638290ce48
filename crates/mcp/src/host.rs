//! Host facade: the single entry point composing registry, consent, context and router.

use crate::protocol::{RegistrationResponse, RequestId, ServerRegistration};
use crate::router::{CancelOutcome, RouteOutcome, Router, RouterConfig};
use mcphub_core::connection::ServerConnection;
use mcphub_core::consent::{ConsentRecord, ConsentStore};
use mcphub_core::context::{Context, ContextStore, RingBuffer};
use mcphub_core::events::{Event, EventBus, EventLog, EventType};
use mcphub_core::registry::{RegisteredServer, RegistrationOutcome, Registry};
use mcphub_core::{
    Capability, CapabilityDescriptor, CapabilityKind, ClientId, ClientInfo, HostError, HostResult,
    ServerId, ServerInfo, Snapshot,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Settings for building a [`Host`]
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub host_id: String,
    pub router: RouterConfig,
    /// Exchanges kept per client; 0 keeps everything
    pub history_capacity: usize,
    /// Per-subscriber event queue length
    pub event_buffer: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            host_id: "mcphub".to_string(),
            router: RouterConfig::default(),
            history_capacity: RingBuffer::DEFAULT_CAPACITY,
            event_buffer: EventBus::DEFAULT_CAPACITY,
        }
    }
}

pub struct Host {
    host_id: String,
    registry: Arc<Registry>,
    consent: Arc<ConsentStore>,
    context: Arc<ContextStore>,
    events: EventBus,
    router: Router,
}

impl Host {
    pub fn new(settings: HostSettings) -> Self {
        let registry = Arc::new(Registry::new());
        let consent = Arc::new(ConsentStore::new());
        let context = Arc::new(ContextStore::with_capacity(settings.history_capacity));
        let events = EventBus::new(settings.event_buffer);
        let router = Router::new(
            registry.clone(),
            consent.clone(),
            context.clone(),
            events.clone(),
            settings.router,
        );

        tracing::info!("Host {} initialised", settings.host_id);

        Self {
            host_id: settings.host_id,
            registry,
            consent,
            context,
            events,
            router,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // Servers

    pub async fn register_server(
        &self,
        server_id: ServerId,
        capabilities: Vec<CapabilityDescriptor>,
        connection: Arc<dyn ServerConnection>,
    ) -> HostResult<RegistrationOutcome> {
        let names: Vec<String> = capabilities.iter().map(|c| c.name.clone()).collect();
        let outcome = self
            .registry
            .register_server(server_id.clone(), capabilities, connection)
            .await?;

        if outcome != RegistrationOutcome::Unchanged {
            let mut names = names;
            names.sort();
            names.dedup();
            self.events.publish(EventType::ServerRegistered {
                server_id,
                capabilities: names,
                replaced: outcome == RegistrationOutcome::Replaced,
            });
        }

        Ok(outcome)
    }

    /// Registration protocol entry point: `{id, capabilities[]}` -> `{status, reason?}`
    pub async fn handle_registration(
        &self,
        registration: ServerRegistration,
        connection: Arc<dyn ServerConnection>,
    ) -> RegistrationResponse {
        let server_id = registration.id.clone();
        let result = self
            .register_server(registration.id, registration.capabilities, connection)
            .await;
        if let Err(e) = &result {
            tracing::warn!("Rejected registration of server {}: {}", server_id, e);
        }
        RegistrationResponse::from_result(&result)
    }

    /// Remove a server and every subscription pointing at it; unknown ids are a no-op
    pub async fn unregister_server(&self, server_id: &ServerId) -> bool {
        self.remove_server(server_id, "unregistered").await
    }

    async fn remove_server(&self, server_id: &ServerId, reason: &str) -> bool {
        let removed = self.registry.unregister_server(server_id).await;
        self.context.clear_server_subscriptions(server_id).await;

        if removed {
            self.events.publish(EventType::ServerUnregistered {
                server_id: server_id.clone(),
                reason: reason.to_string(),
            });
        }
        removed
    }

    pub async fn heartbeat(&self, server_id: &ServerId) -> HostResult<()> {
        self.registry.heartbeat(server_id).await
    }

    /// Drop servers that have not been seen within `timeout`
    pub async fn sweep_stale_servers(&self, timeout: Duration) -> Vec<ServerId> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::weeks(52));
        let stale = self.registry.sweep_stale(timeout).await;

        for server_id in &stale {
            self.context.clear_server_subscriptions(server_id).await;
            self.events.publish(EventType::ServerUnregistered {
                server_id: server_id.clone(),
                reason: "liveness timeout".to_string(),
            });
        }
        stale
    }

    /// Periodically sweep stale servers until the handle is aborted
    pub fn spawn_liveness_monitor(
        self: &Arc<Self>,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let host = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = host.sweep_stale_servers(timeout).await;
                if !removed.is_empty() {
                    tracing::info!("Liveness sweep removed {} server(s)", removed.len());
                }
            }
        })
    }

    pub async fn find_server(&self, server_id: &ServerId) -> HostResult<ServerInfo> {
        Ok(self.registry.find_server(server_id).await?.info())
    }

    pub async fn list_servers(&self) -> Snapshot<ServerInfo> {
        self.registry.list_servers().await
    }

    // Clients

    pub async fn register_client(&self, client_id: ClientId) -> HostResult<ClientInfo> {
        let info = self.registry.register_client(client_id.clone()).await?;
        self.context.get_or_create(&client_id).await;

        self.events.publish(EventType::ClientRegistered {
            client_id,
            session_id: info.session_id.clone(),
        });
        Ok(info)
    }

    /// Remove a client: its in-flight requests are cancelled and its context released
    pub async fn unregister_client(&self, client_id: &ClientId) -> bool {
        let removed = self.registry.unregister_client(client_id).await;

        let cancelled = self.router.cancel_all(client_id);
        if cancelled > 0 {
            tracing::info!(
                "Cancelled {} in-flight request(s) of departing client {}",
                cancelled,
                client_id
            );
        }
        self.context.remove_client(client_id).await;

        if removed {
            self.events.publish(EventType::ClientUnregistered {
                client_id: client_id.clone(),
            });
        }
        removed
    }

    pub async fn list_clients(&self) -> Snapshot<ClientInfo> {
        self.registry.list_clients().await
    }

    /// Host-mediated read of a client's context
    pub async fn context(&self, client_id: &ClientId) -> HostResult<Context> {
        self.context
            .get(client_id)
            .await
            .ok_or_else(|| HostError::NotFound(format!("client {}", client_id)))
    }

    // Consent

    /// Grant consent for a declared capability to a registered client
    pub async fn grant_consent(
        &self,
        client_id: ClientId,
        server_id: ServerId,
        capability: &str,
        grantor: &str,
    ) -> HostResult<ConsentRecord> {
        self.registry.find_client(&client_id).await?;
        let server = self.server(&server_id).await?;
        Self::capability_of(&server, capability)?;

        let record = self
            .consent
            .grant(client_id, server_id, capability, grantor)
            .await;

        self.events.publish(EventType::ConsentGranted {
            consent_id: record.consent_id.clone(),
            client_id: record.client_id.clone(),
            server_id: record.server_id.clone(),
            capability: record.capability.clone(),
            grantor: record.grantor.clone(),
        });
        Ok(record)
    }

    /// Revoke by consent id
    pub async fn revoke_consent(&self, consent_id: &str) -> HostResult<ConsentRecord> {
        let record = self.consent.revoke_by_id(consent_id).await?;
        self.after_revoke(&record).await;
        Ok(record)
    }

    /// Revoke a triple directly; recorded even when nothing was granted
    pub async fn revoke_consent_for(
        &self,
        client_id: ClientId,
        server_id: ServerId,
        capability: &str,
    ) -> ConsentRecord {
        let record = self.consent.revoke(client_id, server_id, capability).await;
        self.after_revoke(&record).await;
        record
    }

    /// A revoked triple also loses its resource subscription
    async fn after_revoke(&self, record: &ConsentRecord) {
        if self
            .context
            .unsubscribe(&record.client_id, &record.server_id, &record.capability)
            .await
        {
            tracing::debug!(
                "Dropped subscription {}.{} of client {} after revoke",
                record.server_id,
                record.capability,
                record.client_id
            );
        }

        self.events.publish(EventType::ConsentRevoked {
            consent_id: record.consent_id.clone(),
            client_id: record.client_id.clone(),
            server_id: record.server_id.clone(),
            capability: record.capability.clone(),
        });
    }

    pub async fn consent(&self, consent_id: &str) -> HostResult<ConsentRecord> {
        self.consent
            .get(consent_id)
            .await
            .ok_or_else(|| HostError::NotFound(format!("consent {}", consent_id)))
    }

    pub async fn list_consents(&self, client_id: &ClientId) -> Vec<ConsentRecord> {
        self.consent.list_for_client(client_id).await
    }

    // Calls

    /// Route a raw JSON-RPC envelope from a client with the default timeout
    pub async fn call(&self, client_id: &ClientId, raw: Value) -> RouteOutcome {
        self.router.route(client_id, raw, None).await
    }

    pub async fn call_with_timeout(
        &self,
        client_id: &ClientId,
        raw: Value,
        timeout: Duration,
    ) -> RouteOutcome {
        self.router.route(client_id, raw, Some(timeout)).await
    }

    pub fn cancel(&self, client_id: &ClientId, request_id: &RequestId) -> CancelOutcome {
        self.router.cancel(client_id, request_id)
    }

    // Resources

    /// Subscribe a client to a subscribable resource; false if already subscribed
    pub async fn subscribe_resource(
        &self,
        client_id: &ClientId,
        server_id: &ServerId,
        resource: &str,
    ) -> HostResult<bool> {
        self.registry.find_client(client_id).await?;
        let server = self.server(server_id).await?;
        let capability = Self::capability_of(&server, resource)?;

        if capability.kind != CapabilityKind::Resource || !capability.subscribable {
            return Err(HostError::InvalidCapability(format!(
                "{}.{} is not a subscribable resource",
                server_id, resource
            )));
        }

        if !self
            .consent
            .is_authorized(client_id, server_id, capability)
            .await
        {
            return Err(HostError::ConsentDenied {
                client_id: client_id.clone(),
                server_id: server_id.clone(),
                capability: resource.to_string(),
            });
        }

        let added = self.context.subscribe(client_id, server_id, resource).await;
        if added {
            tracing::debug!("Client {} subscribed to {}.{}", client_id, server_id, resource);
        }
        Ok(added)
    }

    pub async fn unsubscribe_resource(
        &self,
        client_id: &ClientId,
        server_id: &ServerId,
        resource: &str,
    ) -> bool {
        self.context.unsubscribe(client_id, server_id, resource).await
    }

    /// Fan a resource change out to its subscribers; returns who was notified
    pub async fn notify_resource_updated(
        &self,
        server_id: &ServerId,
        resource: &str,
    ) -> HostResult<Vec<ClientId>> {
        let server = self.server(server_id).await?;
        let capability = Self::capability_of(&server, resource)?;

        // Consent is re-checked at fan-out time, like on every call
        let mut subscribers = Vec::new();
        for client_id in self.context.subscribers_of(server_id, resource).await {
            if self
                .consent
                .is_authorized(&client_id, server_id, capability)
                .await
            {
                subscribers.push(client_id);
            }
        }
        self.events.publish(EventType::ResourceUpdated {
            server_id: server_id.clone(),
            resource: resource.to_string(),
            subscribers: subscribers.clone(),
        });
        Ok(subscribers)
    }

    // Events

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Forward every host event into an append-only log until the handle is aborted
    pub fn spawn_event_recorder(&self, log: Arc<dyn EventLog>) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = log.append(event).await {
                            tracing::error!("Failed to record host event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event recorder lagged; {} event(s) not recorded", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn server(&self, server_id: &ServerId) -> HostResult<RegisteredServer> {
        self.registry
            .find_server(server_id)
            .await
            .map_err(|_| HostError::UnknownServer(server_id.clone()))
    }

    fn capability_of<'a>(server: &'a RegisteredServer, name: &str) -> HostResult<&'a Capability> {
        server
            .capability(name)
            .ok_or_else(|| HostError::UnknownCapability {
                server_id: server.id.clone(),
                capability: name.to_string(),
            })
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(HostSettings::default())
    }
}
