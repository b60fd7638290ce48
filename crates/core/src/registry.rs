use crate::connection::ServerConnection;
use crate::error::{HostError, HostResult};
use crate::types::{
    build_capability_set, Capability, CapabilityDescriptor, CapabilitySet, ClientId, ClientInfo,
    ClientStatus, ServerId, ServerInfo, ServerStatus, Snapshot,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A registered server together with its connection handle
#[derive(Clone)]
pub struct RegisteredServer {
    pub id: ServerId,
    pub status: ServerStatus,
    pub capabilities: Arc<CapabilitySet>,
    pub connection: Arc<dyn ServerConnection>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RegisteredServer {
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            id: self.id.clone(),
            status: self.status,
            capabilities: self
                .capabilities
                .values()
                .map(|c| c.descriptor.clone())
                .collect(),
            registered_at: self.registered_at,
            last_seen: self.last_seen,
        }
    }
}

impl std::fmt::Debug for RegisteredServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredServer")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .field("connection", &self.connection.describe())
            .finish()
    }
}

/// What a server registration did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// First registration of this id
    Registered,
    /// Same id re-registered with a compatible, different capability set
    Replaced,
    /// Same id re-registered with an identical capability set
    Unchanged,
}

/// Registry of live servers and clients
pub struct Registry {
    servers: Arc<RwLock<HashMap<ServerId, RegisteredServer>>>,
    clients: Arc<RwLock<HashMap<ClientId, ClientInfo>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register (or re-register) a server.
    ///
    /// Re-registration replaces the prior entry atomically. It fails with `DuplicateId`
    /// when a capability name is re-declared with a different kind or schema.
    pub async fn register_server(
        &self,
        server_id: ServerId,
        capabilities: Vec<CapabilityDescriptor>,
        connection: Arc<dyn ServerConnection>,
    ) -> HostResult<RegistrationOutcome> {
        server_id.validate()?;
        let capabilities = build_capability_set(capabilities)?;
        let now = Utc::now();

        let mut servers = self.servers.write().await;

        let outcome = match servers.get(&server_id) {
            Some(existing) => {
                for (name, capability) in capabilities.iter() {
                    if let Some(previous) = existing.capabilities.get(name) {
                        if previous.conflicts_with(capability) {
                            return Err(HostError::DuplicateId(format!(
                                "server {} already declares capability {} with a different schema",
                                server_id, name
                            )));
                        }
                    }
                }

                if *existing.capabilities == capabilities {
                    RegistrationOutcome::Unchanged
                } else {
                    RegistrationOutcome::Replaced
                }
            }
            None => RegistrationOutcome::Registered,
        };

        let (registered_at, status) = match servers.get(&server_id) {
            Some(existing) => (existing.registered_at, existing.status),
            None => (now, ServerStatus::Registered),
        };

        servers.insert(
            server_id.clone(),
            RegisteredServer {
                id: server_id.clone(),
                status,
                capabilities: Arc::new(capabilities),
                connection,
                registered_at,
                last_seen: now,
            },
        );

        tracing::info!("Server {} registration: {:?}", server_id, outcome);

        Ok(outcome)
    }

    /// Register a client; fails with `DuplicateId` while the id is registered
    pub async fn register_client(&self, client_id: ClientId) -> HostResult<ClientInfo> {
        client_id.validate()?;
        let mut clients = self.clients.write().await;

        if clients.contains_key(&client_id) {
            return Err(HostError::DuplicateId(format!(
                "client {} is already registered",
                client_id
            )));
        }

        let info = ClientInfo {
            id: client_id.clone(),
            status: ClientStatus::Registered,
            session_id: uuid::Uuid::new_v4().to_string(),
            registered_at: Utc::now(),
        };
        clients.insert(client_id.clone(), info.clone());

        tracing::info!("Client {} registered (session {})", client_id, info.session_id);

        Ok(info)
    }

    /// Remove a server. Unknown ids are a no-op; returns whether an entry was removed.
    pub async fn unregister_server(&self, server_id: &ServerId) -> bool {
        let removed = self.servers.write().await.remove(server_id).is_some();
        if removed {
            tracing::info!("Server {} unregistered", server_id);
        }
        removed
    }

    /// Remove a client. Unknown ids are a no-op; returns whether an entry was removed.
    pub async fn unregister_client(&self, client_id: &ClientId) -> bool {
        let removed = self.clients.write().await.remove(client_id).is_some();
        if removed {
            tracing::info!("Client {} unregistered", client_id);
        }
        removed
    }

    pub async fn find_server(&self, server_id: &ServerId) -> HostResult<RegisteredServer> {
        self.servers
            .read()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("server {}", server_id)))
    }

    pub async fn find_client(&self, client_id: &ClientId) -> HostResult<ClientInfo> {
        self.clients
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("client {}", client_id)))
    }

    /// Point-in-time copy of all servers, ordered by id
    pub async fn list_servers(&self) -> Snapshot<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self
            .servers
            .read()
            .await
            .values()
            .map(RegisteredServer::info)
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot::new(servers)
    }

    /// Point-in-time copy of all clients, ordered by id
    pub async fn list_clients(&self) -> Snapshot<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.clients.read().await.values().cloned().collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot::new(clients)
    }

    /// Refresh a server's liveness timestamp
    pub async fn heartbeat(&self, server_id: &ServerId) -> HostResult<()> {
        let mut servers = self.servers.write().await;
        let server = servers
            .get_mut(server_id)
            .ok_or_else(|| HostError::NotFound(format!("server {}", server_id)))?;

        server.last_seen = Utc::now();
        server.status = ServerStatus::Active;
        Ok(())
    }

    /// Mark a server active after a successful exchange; returns the previous status
    pub async fn mark_active(&self, server_id: &ServerId) -> Option<ServerStatus> {
        self.set_server_status(server_id, ServerStatus::Active).await
    }

    /// Mark a server unreachable after a transport failure; returns the previous status
    pub async fn mark_unreachable(&self, server_id: &ServerId) -> Option<ServerStatus> {
        self.set_server_status(server_id, ServerStatus::Unreachable)
            .await
    }

    async fn set_server_status(
        &self,
        server_id: &ServerId,
        status: ServerStatus,
    ) -> Option<ServerStatus> {
        let mut servers = self.servers.write().await;
        let server = servers.get_mut(server_id)?;
        let previous = server.status;
        server.status = status;
        if status == ServerStatus::Active {
            server.last_seen = Utc::now();
        }
        Some(previous)
    }

    /// Mark a client active; false if it is no longer registered
    pub async fn mark_client_active(&self, client_id: &ClientId) -> bool {
        match self.clients.write().await.get_mut(client_id) {
            Some(client) => {
                client.status = ClientStatus::Active;
                true
            }
            None => false,
        }
    }

    /// Remove servers not seen within `timeout`; returns the removed ids
    pub async fn sweep_stale(&self, timeout: Duration) -> Vec<ServerId> {
        let now = Utc::now();
        let mut servers = self.servers.write().await;

        let stale: Vec<ServerId> = servers
            .values()
            .filter(|s| now - s.last_seen > timeout)
            .map(|s| s.id.clone())
            .collect();

        for server_id in &stale {
            servers.remove(server_id);
            tracing::warn!("Server {} missed its liveness window and was removed", server_id);
        }

        stale
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
