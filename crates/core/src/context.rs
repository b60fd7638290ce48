// Per-client session context owned by the host

use crate::types::{ClientId, ServerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One completed request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// A resource subscription held by a client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub server_id: ServerId,
    pub resource: String,
}

/// Accumulated state for a single client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub client_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub history: VecDeque<Exchange>,
    pub subscriptions: BTreeSet<Subscription>,
    /// Exchanges appended over the context's lifetime, including evicted ones
    pub total_exchanges: u64,
}

impl Context {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            created_at: Utc::now(),
            history: VecDeque::new(),
            subscriptions: BTreeSet::new(),
            total_exchanges: 0,
        }
    }
}

/// Decides which history entries to drop after an append
pub trait EvictionPolicy: Send + Sync {
    fn evict(&self, history: &mut VecDeque<Exchange>);

    fn describe(&self) -> String;
}

/// Keep everything
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn evict(&self, _history: &mut VecDeque<Exchange>) {}

    fn describe(&self) -> String {
        "unbounded".to_string()
    }
}

/// Keep the most recent `capacity` exchanges
pub struct RingBuffer {
    pub capacity: usize,
}

impl RingBuffer {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl EvictionPolicy for RingBuffer {
    fn evict(&self, history: &mut VecDeque<Exchange>) {
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    fn describe(&self) -> String {
        format!("ring buffer ({})", self.capacity)
    }
}

/// Context store keyed by client
pub struct ContextStore {
    contexts: Arc<RwLock<HashMap<ClientId, Context>>>,
    eviction: Arc<dyn EvictionPolicy>,
}

impl ContextStore {
    pub fn new(eviction: Arc<dyn EvictionPolicy>) -> Self {
        tracing::debug!("Context store using {} eviction", eviction.describe());
        Self {
            contexts: Arc::new(RwLock::new(HashMap::new())),
            eviction,
        }
    }

    /// Build a store from a history capacity; 0 means unbounded
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            Self::new(Arc::new(Unbounded))
        } else {
            Self::new(Arc::new(RingBuffer::new(capacity)))
        }
    }

    pub async fn get_or_create(&self, client_id: &ClientId) -> Context {
        self.contexts
            .write()
            .await
            .entry(client_id.clone())
            .or_insert_with(|| Context::new(client_id.clone()))
            .clone()
    }

    pub async fn get(&self, client_id: &ClientId) -> Option<Context> {
        self.contexts.read().await.get(client_id).cloned()
    }

    /// Append a completed exchange; entries land in completion order.
    ///
    /// Only existing contexts are extended: returns false (and records nothing) once the
    /// client's context has been removed.
    pub async fn append_exchange(
        &self,
        client_id: &ClientId,
        request: serde_json::Value,
        response: serde_json::Value,
    ) -> bool {
        let mut contexts = self.contexts.write().await;
        let Some(context) = contexts.get_mut(client_id) else {
            tracing::debug!("Discarding exchange for client {} without a context", client_id);
            return false;
        };

        context.history.push_back(Exchange {
            request,
            response,
            completed_at: Utc::now(),
        });
        context.total_exchanges += 1;
        self.eviction.evict(&mut context.history);
        true
    }

    /// Release all context for a client; returns whether anything was held
    pub async fn remove_client(&self, client_id: &ClientId) -> bool {
        self.contexts.write().await.remove(client_id).is_some()
    }

    /// Record a resource subscription; false if it already existed or the client has no context
    pub async fn subscribe(
        &self,
        client_id: &ClientId,
        server_id: &ServerId,
        resource: &str,
    ) -> bool {
        let mut contexts = self.contexts.write().await;
        match contexts.get_mut(client_id) {
            Some(context) => context.subscriptions.insert(Subscription {
                server_id: server_id.clone(),
                resource: resource.to_string(),
            }),
            None => false,
        }
    }

    pub async fn unsubscribe(
        &self,
        client_id: &ClientId,
        server_id: &ServerId,
        resource: &str,
    ) -> bool {
        let mut contexts = self.contexts.write().await;
        match contexts.get_mut(client_id) {
            Some(context) => context.subscriptions.remove(&Subscription {
                server_id: server_id.clone(),
                resource: resource.to_string(),
            }),
            None => false,
        }
    }

    /// Clients currently subscribed to a resource, ordered by id
    pub async fn subscribers_of(&self, server_id: &ServerId, resource: &str) -> Vec<ClientId> {
        let target = Subscription {
            server_id: server_id.clone(),
            resource: resource.to_string(),
        };
        let mut clients: Vec<ClientId> = self
            .contexts
            .read()
            .await
            .values()
            .filter(|c| c.subscriptions.contains(&target))
            .map(|c| c.client_id.clone())
            .collect();
        clients.sort();
        clients
    }

    /// Drop every subscription that points at a server
    pub async fn clear_server_subscriptions(&self, server_id: &ServerId) {
        for context in self.contexts.write().await.values_mut() {
            context.subscriptions.retain(|s| &s.server_id != server_id);
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::with_capacity(RingBuffer::DEFAULT_CAPACITY)
    }
}
