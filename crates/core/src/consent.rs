use crate::error::{HostError, HostResult};
use crate::types::{Capability, ClientId, ServerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Exact (client, server, capability) triple a consent applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsentKey {
    pub client_id: ClientId,
    pub server_id: ServerId,
    pub capability: String,
}

impl ConsentKey {
    pub fn new(client_id: ClientId, server_id: ServerId, capability: impl Into<String>) -> Self {
        Self {
            client_id,
            server_id,
            capability: capability.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    Granted,
    Revoked,
}

/// Current consent decision for a triple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub consent_id: String,
    pub client_id: ClientId,
    pub server_id: ServerId,
    pub capability: String,
    pub state: ConsentState,
    pub grantor: String,
    pub updated_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn key(&self) -> ConsentKey {
        ConsentKey::new(
            self.client_id.clone(),
            self.server_id.clone(),
            self.capability.clone(),
        )
    }
}

#[derive(Default)]
struct ConsentTable {
    records: HashMap<ConsentKey, ConsentRecord>,
    by_id: HashMap<String, ConsentKey>,
}

/// Consent store: authorizes capability invocation per triple.
///
/// Decisions are evaluated on every call, so a revoke takes effect on the very next request.
pub struct ConsentStore {
    table: Arc<RwLock<ConsentTable>>,
}

impl ConsentStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(ConsentTable::default())),
        }
    }

    /// Grant consent. Re-granting a live grant only refreshes its timestamp.
    pub async fn grant(
        &self,
        client_id: ClientId,
        server_id: ServerId,
        capability: impl Into<String>,
        grantor: impl Into<String>,
    ) -> ConsentRecord {
        let key = ConsentKey::new(client_id, server_id, capability);
        let grantor = grantor.into();
        let now = Utc::now();
        let mut table = self.table.write().await;

        if let Some(record) = table.records.get_mut(&key) {
            if record.state == ConsentState::Granted {
                record.updated_at = now;
                return record.clone();
            }
        }

        // Fresh grant after a revoke (or first grant) gets a new consent id
        if let Some(previous) = table.records.get(&key) {
            let previous_id = previous.consent_id.clone();
            table.by_id.remove(&previous_id);
        }

        let record = ConsentRecord {
            consent_id: uuid::Uuid::new_v4().to_string(),
            client_id: key.client_id.clone(),
            server_id: key.server_id.clone(),
            capability: key.capability.clone(),
            state: ConsentState::Granted,
            grantor,
            updated_at: now,
        };

        table.by_id.insert(record.consent_id.clone(), key.clone());
        table.records.insert(key, record.clone());

        tracing::info!(
            "Consent {} granted: {} -> {}.{} by {}",
            record.consent_id,
            record.client_id,
            record.server_id,
            record.capability,
            record.grantor
        );

        record
    }

    /// Revoke consent for a triple.
    ///
    /// The revocation is recorded even if no grant existed, so the triple stays blocked
    /// until a fresh grant.
    pub async fn revoke(
        &self,
        client_id: ClientId,
        server_id: ServerId,
        capability: impl Into<String>,
    ) -> ConsentRecord {
        let key = ConsentKey::new(client_id, server_id, capability);
        let now = Utc::now();
        let mut table = self.table.write().await;

        let record = match table.records.get_mut(&key) {
            Some(record) => {
                record.state = ConsentState::Revoked;
                record.updated_at = now;
                record.clone()
            }
            None => {
                let record = ConsentRecord {
                    consent_id: uuid::Uuid::new_v4().to_string(),
                    client_id: key.client_id.clone(),
                    server_id: key.server_id.clone(),
                    capability: key.capability.clone(),
                    state: ConsentState::Revoked,
                    grantor: String::new(),
                    updated_at: now,
                };
                table.by_id.insert(record.consent_id.clone(), key.clone());
                table.records.insert(key, record.clone());
                record
            }
        };

        tracing::info!(
            "Consent {} revoked: {} -> {}.{}",
            record.consent_id,
            record.client_id,
            record.server_id,
            record.capability
        );

        record
    }

    /// Revoke by consent id
    pub async fn revoke_by_id(&self, consent_id: &str) -> HostResult<ConsentRecord> {
        let key = self
            .table
            .read()
            .await
            .by_id
            .get(consent_id)
            .cloned()
            .ok_or_else(|| HostError::NotFound(format!("consent {}", consent_id)))?;

        Ok(self
            .revoke(key.client_id, key.server_id, key.capability)
            .await)
    }

    /// True iff the capability needs no consent, or a live grant exists for the exact triple
    pub async fn is_authorized(
        &self,
        client_id: &ClientId,
        server_id: &ServerId,
        capability: &Capability,
    ) -> bool {
        if !capability.requires_consent {
            return true;
        }

        let key = ConsentKey::new(client_id.clone(), server_id.clone(), capability.name.clone());
        self.table
            .read()
            .await
            .records
            .get(&key)
            .map(|r| r.state == ConsentState::Granted)
            .unwrap_or(false)
    }

    pub async fn get(&self, consent_id: &str) -> Option<ConsentRecord> {
        let table = self.table.read().await;
        let key = table.by_id.get(consent_id)?;
        table.records.get(key).cloned()
    }

    pub async fn list_for_client(&self, client_id: &ClientId) -> Vec<ConsentRecord> {
        let mut records: Vec<ConsentRecord> = self
            .table
            .read()
            .await
            .records
            .values()
            .filter(|r| &r.client_id == client_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (a.server_id.as_str(), a.capability.as_str())
                .cmp(&(b.server_id.as_str(), b.capability.as_str()))
        });
        records
    }
}

impl Default for ConsentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilityDescriptor;
    use serde_json::json;

    fn say() -> Capability {
        Capability::try_from(CapabilityDescriptor::tool("say", json!({}))).unwrap()
    }

    fn ids() -> (ClientId, ServerId) {
        (ClientId::new("c1"), ServerId::new("echo-srv"))
    }

    #[tokio::test]
    async fn test_grant_authorizes() {
        let store = ConsentStore::new();
        let (client, server) = ids();

        assert!(!store.is_authorized(&client, &server, &say()).await);
        store.grant(client.clone(), server.clone(), "say", "user").await;
        assert!(store.is_authorized(&client, &server, &say()).await);
    }

    #[tokio::test]
    async fn test_regrant_only_refreshes_timestamp() {
        let store = ConsentStore::new();
        let (client, server) = ids();

        let first = store.grant(client.clone(), server.clone(), "say", "user").await;
        let second = store.grant(client.clone(), server.clone(), "say", "admin").await;

        assert_eq!(first.consent_id, second.consent_id);
        assert_eq!(second.grantor, "user");
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.list_for_client(&client).await.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_blocks_until_fresh_grant() {
        let store = ConsentStore::new();
        let (client, server) = ids();

        let granted = store.grant(client.clone(), server.clone(), "say", "user").await;
        store.revoke(client.clone(), server.clone(), "say").await;
        assert!(!store.is_authorized(&client, &server, &say()).await);

        let regranted = store.grant(client.clone(), server.clone(), "say", "user").await;
        assert_ne!(granted.consent_id, regranted.consent_id);
        assert!(store.is_authorized(&client, &server, &say()).await);
        assert!(store.get(&granted.consent_id).await.is_none());
    }

    #[tokio::test]
    async fn test_revoke_by_id() {
        let store = ConsentStore::new();
        let (client, server) = ids();

        let record = store.grant(client.clone(), server.clone(), "say", "user").await;
        let revoked = store.revoke_by_id(&record.consent_id).await.unwrap();
        assert_eq!(revoked.state, ConsentState::Revoked);
        assert!(!store.is_authorized(&client, &server, &say()).await);

        let err = store.revoke_by_id("missing").await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_exact_triple_only() {
        let store = ConsentStore::new();
        let (client, server) = ids();
        store.grant(client.clone(), server.clone(), "say", "user").await;

        assert!(!store.is_authorized(&ClientId::new("c2"), &server, &say()).await);
        assert!(!store.is_authorized(&client, &ServerId::new("other"), &say()).await);
    }

    #[tokio::test]
    async fn test_capability_without_consent() {
        let store = ConsentStore::new();
        let (client, server) = ids();
        let open = Capability::try_from(
            CapabilityDescriptor::tool("ping", json!({})).without_consent(),
        )
        .unwrap();

        assert!(store.is_authorized(&client, &server, &open).await);
    }
}
