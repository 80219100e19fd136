//! Builds saga execution graphs from step tracking events.

use std::sync::Arc;

use async_trait::async_trait;
use common::SagaInstanceId;
use event_store::EventEnvelope;
use step_tracking::{SAGA_STEP_AGGREGATE_TYPE, STEP_TRACKING_EVENT_TYPES, StepTrackingEvent};

use crate::document::SagaProjection;
use crate::error::{ProjectionError, Result};
use crate::projection::Projection;
use crate::store::{ProjectionCollection, ProjectionStore};

/// Builder tuning.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Retries after a lost compare-and-set before giving up on an event.
    pub max_retries: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Folds step tracking events from any number of services into one
/// [`SagaProjection`] per saga instance.
///
/// Several builders may write to the same store concurrently; every update
/// is a read-modify-write guarded by the document version.
pub struct SagaProjectionBuilder {
    store: Arc<dyn ProjectionStore>,
    config: BuilderConfig,
}

impl SagaProjectionBuilder {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self::with_config(store, BuilderConfig::default())
    }

    pub fn with_config(store: Arc<dyn ProjectionStore>, config: BuilderConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn ProjectionStore> {
        &self.store
    }

    /// Applies one step tracking event to its saga's document.
    ///
    /// Returns whether the document changed. Replays are no-ops.
    #[tracing::instrument(skip(self, event), fields(saga_instance_id = %event.saga_instance_id()))]
    pub async fn apply(&self, event: &StepTrackingEvent) -> Result<bool> {
        let saga_instance_id = event.saga_instance_id();
        let collection = collection_for(event);
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            let (mut document, version) =
                match self.store.load(collection, saga_instance_id).await? {
                    Some(stored) => (stored.value, Some(stored.version)),
                    None => (SagaProjection::new(saga_instance_id), None),
                };

            if !document.apply(event) {
                tracing::debug!(step = %event.saga_step_id(), "step already reflected");
                return Ok(false);
            }

            match self.store.save(collection, &document, version).await {
                Ok(_) => {
                    metrics::counter!("saga_projection_updates_total", "collection" => collection.table())
                        .increment(1);
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    metrics::counter!("saga_projection_conflicts_total").increment(1);
                    tracing::debug!(attempt, "projection document changed concurrently, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!("saga_projection_retries_exhausted_total").increment(1);
        tracing::error!(%saga_instance_id, attempts, "giving up on projection update");
        Err(ProjectionError::RetriesExhausted {
            saga_instance_id,
            attempts,
        })
    }

    /// Loads the graph of a named saga.
    pub async fn get(&self, saga_instance_id: SagaInstanceId) -> Result<Option<SagaProjection>> {
        Ok(self
            .store
            .load(ProjectionCollection::Named, saga_instance_id)
            .await?
            .map(|d| d.value))
    }

    /// Loads the chain built from a reduced context.
    pub async fn get_reduced(
        &self,
        saga_instance_id: SagaInstanceId,
    ) -> Result<Option<SagaProjection>> {
        Ok(self
            .store
            .load(ProjectionCollection::Reduced, saga_instance_id)
            .await?
            .map(|d| d.value))
    }
}

/// Only events appended by step tracking itself; a business event may reuse
/// one of the type names.
fn is_step_tracking_event(event: &EventEnvelope) -> bool {
    event.aggregate_type == SAGA_STEP_AGGREGATE_TYPE
        && STEP_TRACKING_EVENT_TYPES.contains(&event.event_type.as_str())
}

fn collection_for(event: &StepTrackingEvent) -> ProjectionCollection {
    match event {
        StepTrackingEvent::SagaStepDefaultProcessed(_) => ProjectionCollection::Reduced,
        _ => ProjectionCollection::Named,
    }
}

#[async_trait]
impl Projection for SagaProjectionBuilder {
    fn name(&self) -> &'static str {
        "SagaProjectionBuilder"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if !is_step_tracking_event(event) {
            return Ok(());
        }
        let step_event: StepTrackingEvent = serde_json::from_value(event.payload.clone())?;
        self.apply(&step_event).await?;
        Ok(())
    }

    /// Leaves the documents in place.
    ///
    /// They hold steps contributed by every service sharing the store, and
    /// replaying the local log into them is idempotent.
    async fn reset(&self) -> Result<()> {
        tracing::debug!("saga projections are shared, rebuilding by replay only");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryProjectionStore, Versioned};
    use chrono::Utc;
    use common::SagaStepId;
    use domain::DomainEvent;
    use step_tracking::{StepDefaultProcessedData, StepProcessedData, StepSeenData};

    fn launched(instance: SagaInstanceId, step: SagaStepId) -> StepTrackingEvent {
        StepTrackingEvent::SagaStepLaunched(StepSeenData {
            saga_instance_id: instance,
            saga_step_id: step,
            saga_name: "checkout".to_string(),
            step_name: "place".to_string(),
            prev_steps_ids: Default::default(),
            initiated_at: Utc::now(),
        })
    }

    fn processed(instance: SagaInstanceId, step: SagaStepId) -> StepTrackingEvent {
        StepTrackingEvent::SagaStepProcessed(StepProcessedData {
            saga_instance_id: instance,
            saga_step_id: step,
            saga_name: Some("checkout".to_string()),
            event_name: "OrderPlaced".to_string(),
            processed_at: Utc::now(),
        })
    }

    fn builder() -> (SagaProjectionBuilder, InMemoryProjectionStore) {
        let store = InMemoryProjectionStore::new();
        (SagaProjectionBuilder::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn builds_named_document() {
        let (builder, _) = builder();
        let instance = SagaInstanceId::new();
        let step = SagaStepId::new();

        assert!(builder.apply(&launched(instance, step)).await.unwrap());
        assert!(builder.apply(&processed(instance, step)).await.unwrap());
        assert!(!builder.apply(&processed(instance, step)).await.unwrap());

        let doc = builder.get(instance).await.unwrap().unwrap();
        assert_eq!(doc.saga_name.as_deref(), Some("checkout"));
        assert!(doc.is_complete());
        assert!(builder.get_reduced(instance).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_processed_goes_to_reduced_collection() {
        let (builder, _) = builder();
        let instance = SagaInstanceId::new();
        let event = StepTrackingEvent::SagaStepDefaultProcessed(StepDefaultProcessedData {
            saga_instance_id: instance,
            saga_step_id: SagaStepId::new(),
            prev_steps_ids: Default::default(),
            event_name: "Shipped".to_string(),
            initiated_at: Utc::now(),
            processed_at: Utc::now(),
        });

        builder.apply(&event).await.unwrap();

        assert!(builder.get(instance).await.unwrap().is_none());
        assert_eq!(builder.get_reduced(instance).await.unwrap().unwrap().steps.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_builders_lose_no_update() {
        let store = Arc::new(InMemoryProjectionStore::new());
        let instance = SagaInstanceId::new();
        let steps: Vec<SagaStepId> = (0..8).map(|_| SagaStepId::new()).collect();

        let mut handles = Vec::new();
        for step in steps.clone() {
            let builder = SagaProjectionBuilder::with_config(
                store.clone(),
                BuilderConfig { max_retries: 50 },
            );
            handles.push(tokio::spawn(async move {
                builder.apply(&launched(instance, step)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let Versioned { value, version } = store
            .load(ProjectionCollection::Named, instance)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.steps.len(), steps.len());
        assert_eq!(version, steps.len() as u64);
    }

    /// Always reports a conflict on save.
    struct ContendedStore;

    #[async_trait]
    impl ProjectionStore for ContendedStore {
        async fn load(
            &self,
            _: ProjectionCollection,
            _: SagaInstanceId,
        ) -> Result<Option<Versioned<SagaProjection>>> {
            Ok(None)
        }

        async fn save(
            &self,
            collection: ProjectionCollection,
            projection: &SagaProjection,
            _: Option<u64>,
        ) -> Result<u64> {
            Err(ProjectionError::Conflict {
                collection,
                saga_instance_id: projection.saga_instance_id,
            })
        }

        async fn list(&self, _: ProjectionCollection) -> Result<Vec<SagaProjection>> {
            Ok(vec![])
        }

        async fn clear(&self, _: ProjectionCollection) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let builder = SagaProjectionBuilder::with_config(
            Arc::new(ContendedStore),
            BuilderConfig { max_retries: 2 },
        );

        let result = builder
            .apply(&launched(SagaInstanceId::new(), SagaStepId::new()))
            .await;

        assert!(matches!(
            result,
            Err(ProjectionError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    fn envelope(aggregate_type: &str, event_type: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(common::AggregateId::new())
            .aggregate_type(aggregate_type)
            .event_type(event_type)
            .version(event_store::Version::first())
            .payload_raw(payload)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn ignores_foreign_events() {
        let (builder, store) = builder();

        builder
            .handle(&envelope("Payment", "PaymentCaptured", serde_json::json!({"amount": 1})))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn business_event_reusing_a_tracking_type_name_is_ignored() {
        let (builder, store) = builder();

        builder
            .handle(&envelope("Payment", "SagaStepProcessed", serde_json::json!({"amount": 1})))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn handles_tracking_events_from_step_aggregates() {
        let (builder, _) = builder();
        let instance = SagaInstanceId::new();
        let event = launched(instance, SagaStepId::new());

        builder
            .handle(&envelope(
                SAGA_STEP_AGGREGATE_TYPE,
                event.event_type(),
                serde_json::to_value(&event).unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(builder.get(instance).await.unwrap().unwrap().steps.len(), 1);
    }

    #[tokio::test]
    async fn reset_keeps_shared_documents() {
        let (builder, store) = builder();
        let instance = SagaInstanceId::new();
        builder
            .apply(&launched(instance, SagaStepId::new()))
            .await
            .unwrap();

        builder.reset().await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(builder.get(instance).await.unwrap().is_some());
    }
}
