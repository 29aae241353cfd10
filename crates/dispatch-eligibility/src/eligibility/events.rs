//! In-process domain event bus.
//!
//! Each published event is delivered to every subscriber registered for its
//! [`EventType`], each on its own tokio task, so a slow or failing subscriber
//! never delays its siblings. Events only signal that upstream state changed;
//! subscribers re-read whatever they need at execution time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::domain::WorkerId;

/// Discriminant used to route events to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    WorkerBanSaved,
    WorkerBanDeleted,
    WorkerDncSaved,
    WorkerDncDeleted,
    WorkerHoldSaved,
    WorkerHoldDeleted,
    DailyRollover,
}

/// Typed domain events consumed by the eligibility engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    WorkerBanSaved { worker_id: WorkerId, ban_id: String },
    WorkerBanDeleted { worker_id: WorkerId, ban_id: String },
    WorkerDncSaved { worker_id: WorkerId, dnc_id: String },
    WorkerDncDeleted { worker_id: WorkerId, dnc_id: String },
    WorkerHoldSaved { worker_id: WorkerId, hold_id: String },
    WorkerHoldDeleted { worker_id: WorkerId, hold_id: String },
    DailyRollover { date: NaiveDate },
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::WorkerBanSaved { .. } => EventType::WorkerBanSaved,
            DomainEvent::WorkerBanDeleted { .. } => EventType::WorkerBanDeleted,
            DomainEvent::WorkerDncSaved { .. } => EventType::WorkerDncSaved,
            DomainEvent::WorkerDncDeleted { .. } => EventType::WorkerDncDeleted,
            DomainEvent::WorkerHoldSaved { .. } => EventType::WorkerHoldSaved,
            DomainEvent::WorkerHoldDeleted { .. } => EventType::WorkerHoldDeleted,
            DomainEvent::DailyRollover { .. } => EventType::DailyRollover,
        }
    }
}

/// Receiver of events for the types it was subscribed to.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Label used in logs.
    fn name(&self) -> String;

    async fn handle(&self, event: Arc<DomainEvent>);
}

type SubscriberMap = HashMap<EventType, Vec<Arc<dyn EventSubscriber>>>;

/// Publish/subscribe bus keyed by [`EventType`].
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: EventType, subscriber: Arc<dyn EventSubscriber>) {
        debug!(?event_type, subscriber = %subscriber.name(), "event subscription added");
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .entry(event_type)
            .or_default()
            .push(subscriber);
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .read()
            .expect("event bus lock poisoned")
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Fan the event out to its subscribers. Must be called inside a tokio runtime.
    ///
    /// The returned [`Delivery`] may be dropped for fire-and-forget publishing;
    /// awaiting [`Delivery::settled`] waits until every subscriber has finished.
    pub fn publish(&self, event: DomainEvent) -> Delivery {
        let event_type = event.event_type();
        let subscribers = self
            .subscribers
            .read()
            .expect("event bus lock poisoned")
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            debug!(?event_type, "event published without subscribers");
        }

        let event = Arc::new(event);
        let handles = subscribers
            .into_iter()
            .map(|subscriber| {
                let event = Arc::clone(&event);
                let handle = tokio::spawn(async move { subscriber.handle(event).await });
                (handle, event_type)
            })
            .collect();

        Delivery { handles }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.subscribers.read().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("event_types", &guard.len())
            .finish()
    }
}

/// Handle over the subscriber tasks spawned by one publish.
#[must_use = "drop the delivery explicitly for fire-and-forget publishing"]
pub struct Delivery {
    handles: Vec<(JoinHandle<()>, EventType)>,
}

impl Delivery {
    pub fn subscriber_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for all subscribers. Panicking subscribers are logged, not propagated.
    pub async fn settled(self) {
        for (handle, event_type) in self.handles {
            if let Err(err) = handle.await {
                warn!(?event_type, error = %err, "event subscriber task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        fn name(&self) -> String {
            "recorder".to_string()
        }

        async fn handle(&self, event: Arc<DomainEvent>) {
            self.seen
                .lock()
                .expect("recorder mutex poisoned")
                .push((*event).clone());
        }
    }

    #[tokio::test]
    async fn delivers_only_to_matching_subscribers() {
        let bus = EventBus::new();
        let bans = Arc::new(Recorder::default());
        let holds = Arc::new(Recorder::default());
        bus.subscribe(EventType::WorkerBanSaved, bans.clone());
        bus.subscribe(EventType::WorkerHoldSaved, holds.clone());

        let delivery = bus.publish(DomainEvent::WorkerBanSaved {
            worker_id: WorkerId::new("w-1"),
            ban_id: "b-1".to_string(),
        });
        assert_eq!(delivery.subscriber_count(), 1);
        delivery.settled().await;

        assert_eq!(bans.seen.lock().expect("poisoned").len(), 1);
        assert!(holds.seen.lock().expect("poisoned").is_empty());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        let delivery = bus.publish(DomainEvent::DailyRollover {
            date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
        });
        assert_eq!(delivery.subscriber_count(), 0);
        delivery.settled().await;
    }

    #[test]
    fn events_serialize_with_screaming_type_tag() {
        let event = DomainEvent::WorkerBanSaved {
            worker_id: WorkerId::new("w-1"),
            ban_id: "b-1".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "WORKER_BAN_SAVED");
        assert_eq!(event.event_type(), EventType::WorkerBanSaved);
    }
}
