use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, LogPosition, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
    subscription::{EventBus, EventFilter, EventPublisher, Subscription},
};

/// In-memory event log.
///
/// Keeps events in append order, which is also the global log order used by
/// [`EventStore::stream_all_events_from`]. Clones share the same log.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
    publisher: EventPublisher,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns a copy of every event in log order.
    pub async fn all_events(&self) -> Vec<EventEnvelope> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let last_version = {
            let mut store = self.events.write().await;

            let current_version = store
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .map(|e| e.version)
                .max()
                .unwrap_or(Version::initial());

            if let Some(expected) = options.expected_version
                && current_version != expected
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual: current_version,
                });
            }

            // Unique (aggregate_id, version) constraint
            if first_new_version <= current_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: options.expected_version.unwrap_or(current_version),
                    actual: current_version,
                });
            }

            let last_version = events
                .last()
                .map(|e| e.version)
                .unwrap_or(Version::initial());
            store.extend(events.iter().cloned());
            tracing::debug!(%aggregate_id, %last_version, log_len = store.len(), "events appended");
            last_version
        };

        self.publisher.publish(&events);
        metrics::counter!("event_store_events_appended").increment(events.len() as u64);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn stream_all_events_from(&self, from: LogPosition) -> Result<EventStream> {
        use futures_util::stream;

        let skip = usize::try_from(from.as_u64()).unwrap_or(usize::MAX);
        let events: Vec<_> = self
            .events
            .read()
            .await
            .iter()
            .skip(skip)
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

impl EventBus for InMemoryEventStore {
    fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.publisher.subscribe(filter)
    }
}
