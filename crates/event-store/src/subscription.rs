//! Broadcast subscriptions to newly appended events.
//!
//! A subscription is a live notification feed, not a durable cursor: slow
//! subscribers may miss events ([`Delivery::Lagged`]). Consumers that must
//! see everything treat a delivery as a cue to catch up from their checkpoint
//! via [`crate::EventStore::stream_all_events_from`].

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::EventEnvelope;

/// Default number of events buffered per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Selects which appended events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event of every aggregate type.
    All,
    /// Events whose aggregate type is one of these.
    AggregateTypes(Vec<String>),
    /// Events whose event type is one of these.
    EventTypes(Vec<String>),
}

impl EventFilter {
    /// Filter for a set of event types.
    pub fn event_types<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        EventFilter::EventTypes(types.into_iter().map(Into::into).collect())
    }

    /// Filter for a set of aggregate types.
    pub fn aggregate_types<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        EventFilter::AggregateTypes(types.into_iter().map(Into::into).collect())
    }

    /// Returns true if the event passes this filter.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::AggregateTypes(types) => types.iter().any(|t| *t == event.aggregate_type),
            EventFilter::EventTypes(types) => types.iter().any(|t| *t == event.event_type),
        }
    }
}

/// What a subscriber receives next.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A matching event was appended.
    Event(EventEnvelope),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
}

/// A filtered receiver of appended events.
pub struct Subscription {
    receiver: broadcast::Receiver<EventEnvelope>,
    filter: EventFilter,
}

impl Subscription {
    /// Waits for the next matching delivery.
    ///
    /// Returns None once the publishing store has been dropped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => return Some(Delivery::Lagged(missed)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the filter this subscription was created with.
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

/// Fan-out half shared by event store implementations.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventPublisher {
    /// Creates a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes committed events to current subscribers.
    pub fn publish(&self, events: &[EventEnvelope]) {
        for event in events {
            // No subscribers is not an error: the log remains the source of truth.
            let _ = self.sender.send(event.clone());
        }
    }

    /// Opens a new subscription. Only events published afterwards are received.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Explicit broadcast capability of an event log.
pub trait EventBus: Send + Sync {
    /// Subscribes to events appended from now on that match `filter`.
    fn subscribe(&self, filter: EventFilter) -> Subscription;

    /// Subscribes to every event of every aggregate type.
    fn subscribe_all(&self) -> Subscription {
        self.subscribe(EventFilter::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregateId, Version};

    fn event(aggregate_type: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type(aggregate_type)
            .event_type(event_type)
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[test]
    fn filter_matching() {
        let e = event("SagaStep", "SagaStepLaunched");

        assert!(EventFilter::All.matches(&e));
        assert!(EventFilter::aggregate_types(["SagaStep"]).matches(&e));
        assert!(!EventFilter::aggregate_types(["Payment"]).matches(&e));
        assert!(EventFilter::event_types(["SagaStepLaunched", "SagaStepProcessed"]).matches(&e));
        assert!(!EventFilter::event_types(["SagaStepProcessed"]).matches(&e));
    }

    #[tokio::test]
    async fn subscription_skips_non_matching_events() {
        let publisher = EventPublisher::default();
        let mut sub = publisher.subscribe(EventFilter::event_types(["Wanted"]));

        publisher.publish(&[event("Payment", "Ignored"), event("Payment", "Wanted")]);

        match sub.recv().await {
            Some(Delivery::Event(e)) => assert_eq!(e.event_type, "Wanted"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_told_it_lagged() {
        let publisher = EventPublisher::new(2);
        let mut sub = publisher.subscribe(EventFilter::All);

        publisher.publish(&[
            event("Payment", "A"),
            event("Payment", "B"),
            event("Payment", "C"),
        ]);

        assert!(matches!(sub.recv().await, Some(Delivery::Lagged(1))));
    }

    #[tokio::test]
    async fn recv_returns_none_when_publisher_dropped() {
        let publisher = EventPublisher::default();
        let mut sub = publisher.subscribe(EventFilter::All);
        drop(publisher);

        assert!(sub.recv().await.is_none());
    }
}
