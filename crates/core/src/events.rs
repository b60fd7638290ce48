use crate::types::{ClientId, ServerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events that can occur in the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Server lifecycle events
    ServerRegistered {
        server_id: ServerId,
        capabilities: Vec<String>,
        replaced: bool,
    },
    ServerUnregistered {
        server_id: ServerId,
        reason: String,
    },
    ServerUnreachable {
        server_id: ServerId,
        error: String,
    },

    // Client lifecycle events
    ClientRegistered {
        client_id: ClientId,
        session_id: String,
    },
    ClientUnregistered {
        client_id: ClientId,
    },

    // Consent events
    ConsentGranted {
        consent_id: String,
        client_id: ClientId,
        server_id: ServerId,
        capability: String,
        grantor: String,
    },
    ConsentRevoked {
        consent_id: String,
        client_id: ClientId,
        server_id: ServerId,
        capability: String,
    },

    // Request events
    RequestCompleted {
        client_id: ClientId,
        request_id: String,
        method: String,
        success: bool,
        duration_ms: u64,
    },
    RequestRejected {
        client_id: ClientId,
        request_id: Option<String>,
        method: Option<String>,
        error_kind: String,
    },
    RequestCancelled {
        client_id: ClientId,
        request_id: String,
        after_dispatch: bool,
    },

    // Resource events
    ResourceUpdated {
        server_id: ServerId,
        resource: String,
        subscribers: Vec<ClientId>,
    },
}

/// Broadcast fan-out of host events.
///
/// Each subscriber gets its own queue of `capacity` events; a slow subscriber lags
/// (and loses the oldest events) without blocking the publisher or other subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; returns the number of subscribers it was queued for
    pub fn publish(&self, event_type: EventType) -> usize {
        let event = Event::new(event_type);
        tracing::debug!("Publishing host event {}", event.id);
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Append-only sink for host events
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event to the log
    async fn append(&self, event: Event) -> anyhow::Result<()>;

    /// Get all recorded events, oldest first
    async fn events(&self) -> anyhow::Result<Vec<Event>>;

    /// Get events within a time range
    async fn events_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>> {
        Ok(self
            .events()
            .await?
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        let delivered = bus.publish(EventType::ClientUnregistered {
            client_id: ClientId::new("c1"),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_event() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(EventType::ClientRegistered {
            client_id: ClientId::new("c1"),
            session_id: "s".to_string(),
        });

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.id, eb.id);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();

        for i in 0..5 {
            bus.publish(EventType::ClientUnregistered {
                client_id: ClientId::new(format!("c{}", i)),
            });
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert!(slow.recv().await.is_ok());
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = Event::new(EventType::ServerUnregistered {
            server_id: ServerId::new("s"),
            reason: "explicit".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"]["type"], "server_unregistered");
        assert_eq!(json["event_type"]["server_id"], "s");
    }
}
