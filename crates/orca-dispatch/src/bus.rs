//! Event bus contract
//!
//! Domains publish canonical events carrying a metadata envelope and
//! subscribe to the event types they care about. Delivery is at-least-once
//! from the consumer's point of view; nothing here deduplicates.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use orca_ledger::Metadata;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Id of the entity the event is about.
    pub id: String,
    pub event_type: String,
    pub metadata: Metadata,
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, id: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            metadata,
            published_at: Utc::now(),
        }
    }
}

/// Extra predicate applied after event type matching.
pub type EventFilter = Arc<dyn Fn(&BusEvent) -> bool + Send + Sync>;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event_type: &str, id: &str, metadata: Metadata) -> Result<()>;

    /// Stream of events whose type is in `types` (all types if empty) and
    /// that pass `filter`.
    async fn subscribe(&self, types: &[String], filter: Option<EventFilter>) -> Result<Box<dyn Subscription>>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next matching event, `None` once the bus is closed.
    async fn next(&mut self) -> Option<BusEvent>;
}

// ============================================================================
// In-memory bus
// ============================================================================

/// Process-local bus over a tokio broadcast channel. Slow subscribers that
/// fall behind by more than `capacity` events lose the oldest ones.
pub struct InMemoryEventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl InMemoryEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event_type: &str, id: &str, metadata: Metadata) -> Result<()> {
        // No subscribers is not an error for a fire-and-forget bus.
        let _ = self.tx.send(BusEvent::new(event_type, id, metadata));
        metrics::counter!("orca_bus_published_total").increment(1);
        Ok(())
    }

    async fn subscribe(&self, types: &[String], filter: Option<EventFilter>) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(InMemorySubscription {
            rx: self.tx.subscribe(),
            types: types.iter().cloned().collect(),
            filter,
        }))
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<BusEvent>,
    types: HashSet<String>,
    filter: Option<EventFilter>,
}

impl InMemorySubscription {
    fn matches(&self, event: &BusEvent) -> bool {
        (self.types.is_empty() || self.types.contains(&event.event_type))
            && self.filter.as_ref().map_or(true, |f| f(event))
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus subscriber lagged, events dropped");
                    metrics::counter!("orca_bus_lagged_total").increment(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_type() {
        let bus = InMemoryEventBus::default();
        let mut sub = bus
            .subscribe(&["content:create_content:v1:requested".to_string()], None)
            .await
            .unwrap();

        bus.publish("media:upload:v1:requested", "m-1", Metadata::new()).await.unwrap();
        bus.publish("content:create_content:v1:requested", "c-1", Metadata::new()).await.unwrap();

        let event = sub.next().await.unwrap();
        assert_eq!(event.id, "c-1");
    }

    #[tokio::test]
    async fn test_subscription_filter_predicate() {
        let bus = InMemoryEventBus::default();
        let filter: EventFilter = Arc::new(|e: &BusEvent| e.metadata.has_tag("tenant:a"));
        let mut sub = bus.subscribe(&[], Some(filter)).await.unwrap();

        bus.publish("content:create_content:v1:requested", "c-1", Metadata::new()).await.unwrap();
        let mut tagged = Metadata::new();
        tagged.add_tag("tenant:a");
        bus.publish("content:create_content:v1:requested", "c-2", tagged).await.unwrap();

        assert_eq!(sub.next().await.unwrap().id, "c-2");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InMemoryEventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.publish("a:b:v1:requested", "x", Metadata::new()).await.is_ok());
    }
}
