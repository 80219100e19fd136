//! Event-stream watcher.
//!
//! Reads every event of the local log from a durable checkpoint, extracts the
//! saga metadata attached to it and drives the step tracking state machine.
//! Delivery is at-least-once: a crash between handling an event and saving
//! the checkpoint replays that event, which the state machine absorbs as a
//! no-op.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use event_store::{
    CheckpointStore, Delivery, EventEnvelope, EventStore, LogPosition, Subscription,
};
use futures_util::StreamExt;
use saga::{SagaMetadata, extract_metadata};
use tokio::sync::Mutex;

use crate::aggregate::SAGA_STEP_AGGREGATE_TYPE;
use crate::commands::{MarkProcessed, RecordDefaultProcessed, TrackStep};
use crate::error::{Result, StepTrackingError};
use crate::service::StepTrackingService;

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Checkpoint name; unique per watcher and log.
    pub name: String,
    /// Catch-up interval when no notification arrives.
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            name: "saga-watcher".to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What handling one event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The event carried no usable saga metadata.
    Skipped,
    /// This many steps were driven through the state machine.
    Tracked(usize),
}

/// Drives the step tracking state machine from the local event log.
pub struct SagaEventWatcher<S: EventStore + Clone> {
    store: S,
    service: StepTrackingService<S>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: WatcherConfig,
    catch_up_lock: Mutex<()>,
}

impl<S: EventStore + Clone> SagaEventWatcher<S> {
    /// Creates a watcher recording steps into the same log it reads.
    pub fn new(store: S, checkpoints: Arc<dyn CheckpointStore>, config: WatcherConfig) -> Self {
        Self {
            service: StepTrackingService::new(store.clone()),
            store,
            checkpoints,
            config,
            catch_up_lock: Mutex::new(()),
        }
    }

    /// Returns the step tracking service the watcher writes through.
    pub fn service(&self) -> &StepTrackingService<S> {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Handles a single event of the local log.
    ///
    /// Events without metadata, with malformed metadata, or belonging to the
    /// step tracking aggregate itself are skipped. A step the state machine
    /// refuses (for example an instance-id mismatch) is logged and the
    /// remaining steps of the event are still handled.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &EventEnvelope) -> Result<WatchOutcome> {
        metrics::counter!("saga_watcher_events_total").increment(1);

        if event.aggregate_type == SAGA_STEP_AGGREGATE_TYPE {
            return Ok(WatchOutcome::Skipped);
        }

        let metadata = match extract_metadata(event) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                tracing::debug!(event_id = %event.event_id, "event carries no saga metadata");
                metrics::counter!("saga_watcher_events_skipped_total").increment(1);
                return Ok(WatchOutcome::Skipped);
            }
            Err(error) => {
                tracing::warn!(event_id = %event.event_id, %error, "malformed saga metadata, skipping event");
                metrics::counter!("saga_watcher_events_skipped_total").increment(1);
                return Ok(WatchOutcome::Skipped);
            }
        };

        match metadata {
            SagaMetadata::Named(context) => {
                let mut tracked = 0;
                for step in context.iter() {
                    let outcome = async {
                        self.service
                            .track_step(TrackStep::new(step.clone(), event.timestamp))
                            .await?;
                        self.service
                            .mark_processed(MarkProcessed::for_step(step, &event.event_type))
                            .await
                    }
                    .await;
                    if tolerate_rejection(outcome, event)? {
                        tracked += 1;
                    }
                }
                Ok(WatchOutcome::Tracked(tracked))
            }
            SagaMetadata::Reduced(context) => {
                let outcome = self
                    .service
                    .record_default_processed(RecordDefaultProcessed::new(
                        context,
                        &event.event_type,
                        event.timestamp,
                    ))
                    .await;
                let tracked = usize::from(tolerate_rejection(outcome, event)?);
                Ok(WatchOutcome::Tracked(tracked))
            }
        }
    }

    /// Handles every event after the checkpoint, saving it after each one.
    ///
    /// Returns the number of events read. Concurrent calls on one watcher
    /// are serialized.
    #[tracing::instrument(skip(self), fields(watcher = %self.config.name))]
    pub async fn catch_up(&self) -> Result<usize> {
        let _guard = self.catch_up_lock.lock().await;

        let mut position = self
            .checkpoints
            .load(&self.config.name)
            .await?
            .unwrap_or(LogPosition::zero());
        let mut stream = self.store.stream_all_events_from(position).await?;

        let mut handled = 0;
        while let Some(event) = stream.next().await {
            let event = event?;
            self.handle_event(&event).await?;
            position = position.advance();
            self.checkpoints.save(&self.config.name, position).await?;
            handled += 1;
        }

        if handled > 0 {
            tracing::debug!(handled, %position, "watcher caught up");
        }
        Ok(handled)
    }

    /// Runs until `shutdown` resolves or the log goes away.
    ///
    /// Catches up on start, on every notification from `subscription`, and
    /// on every poll tick. Failures are logged and retried on the next pass.
    pub async fn run(&self, mut subscription: Subscription, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(watcher = %self.config.name, "saga event watcher started");

        loop {
            if let Err(error) = self.catch_up().await {
                tracing::warn!(watcher = %self.config.name, %error, "watcher catch-up failed");
            }

            tokio::select! {
                _ = &mut shutdown => break,
                delivery = subscription.recv() => match delivery {
                    Some(Delivery::Event(_)) => {}
                    Some(Delivery::Lagged(missed)) => {
                        tracing::debug!(missed, "watcher notifications lagged");
                    }
                    None => break,
                },
                _ = ticker.tick() => {}
            }
        }

        tracing::info!(watcher = %self.config.name, "saga event watcher stopped");
    }
}

/// Turns a refused step into a warning; other errors propagate.
///
/// Returns whether the step was handled.
fn tolerate_rejection<T>(outcome: Result<T>, event: &EventEnvelope) -> Result<bool> {
    match outcome {
        Ok(_) => Ok(true),
        Err(StepTrackingError::Rejected(reason)) => {
            tracing::warn!(event_id = %event.event_id, %reason, "saga step refused");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StepState;
    use common::AggregateId;
    use event_store::{
        AppendOptions, EventBus, EventStoreExt, InMemoryCheckpointStore, InMemoryEventStore,
        Version,
    };
    use saga::{ReducedContext, SagaCoordinator, attach_metadata};

    fn business_event(metadata: Option<&SagaMetadata>) -> EventEnvelope {
        let mut event = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("Payment")
            .event_type("PaymentCaptured")
            .version(Version::first())
            .payload_raw(serde_json::json!({"amount": 10}))
            .build()
            .unwrap();
        if let Some(metadata) = metadata {
            attach_metadata(&mut event, metadata).unwrap();
        }
        event
    }

    fn watcher(store: &InMemoryEventStore) -> SagaEventWatcher<InMemoryEventStore> {
        SagaEventWatcher::new(
            store.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            WatcherConfig::default(),
        )
    }

    async fn append(store: &InMemoryEventStore, event: EventEnvelope) {
        store
            .append_event(event, AppendOptions::expect_new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn named_step_is_launched_and_processed() {
        let store = InMemoryEventStore::new();
        let watcher = watcher(&store);
        let context = SagaCoordinator::launch("checkout", "capture");
        let step_id = context.get("checkout").unwrap().saga_step_id;

        let event = business_event(Some(&SagaMetadata::from(context)));
        let timestamp = event.timestamp;
        append(&store, event).await;

        watcher.catch_up().await.unwrap();

        let record = watcher.service().get_step(step_id).await.unwrap().unwrap();
        assert_eq!(record.state, StepState::Processed);
        assert_eq!(record.event_name.as_deref(), Some("PaymentCaptured"));
        assert_eq!(record.initiated_at, timestamp);
    }

    #[tokio::test]
    async fn nested_context_tracks_every_saga() {
        let store = InMemoryEventStore::new();
        let watcher = watcher(&store);
        let outer = SagaCoordinator::launch("order", "place");
        let nested = SagaCoordinator::given(&outer)
            .launch_nested("payment", "authorize")
            .unwrap();

        let outcome = watcher
            .handle_event(&business_event(Some(&SagaMetadata::from(nested))))
            .await
            .unwrap();

        assert_eq!(outcome, WatchOutcome::Tracked(2));
    }

    #[tokio::test]
    async fn reduced_context_records_single_transition() {
        let store = InMemoryEventStore::new();
        let watcher = watcher(&store);
        let context = ReducedContext::launch();

        watcher
            .handle_event(&business_event(Some(&SagaMetadata::from(context))))
            .await
            .unwrap();

        let events = store.all_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "SagaStepDefaultProcessed");
    }

    #[tokio::test]
    async fn events_without_metadata_are_skipped() {
        let store = InMemoryEventStore::new();
        let watcher = watcher(&store);

        let plain = watcher.handle_event(&business_event(None)).await.unwrap();

        let mut malformed = business_event(None);
        malformed
            .metadata
            .insert("saga".to_string(), serde_json::json!({"kind": "unknown"}));
        let bad = watcher.handle_event(&malformed).await.unwrap();

        assert_eq!(plain, WatchOutcome::Skipped);
        assert_eq!(bad, WatchOutcome::Skipped);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn catch_up_resumes_from_checkpoint() {
        let store = InMemoryEventStore::new();
        let watcher = watcher(&store);

        append(&store, business_event(Some(&SagaCoordinator::launch("a", "1").into()))).await;
        // launched + processed tracking events are appended behind the business event
        assert_eq!(watcher.catch_up().await.unwrap(), 1);
        assert_eq!(store.event_count().await, 3);

        append(&store, business_event(Some(&SagaCoordinator::launch("b", "1").into()))).await;
        // the two tracking events from the first pass are read (and skipped) now
        assert_eq!(watcher.catch_up().await.unwrap(), 3);
        assert_eq!(store.event_count().await, 5);

        assert_eq!(watcher.catch_up().await.unwrap(), 2);
        assert_eq!(watcher.catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replay_from_scratch_is_idempotent() {
        let store = InMemoryEventStore::new();
        append(&store, business_event(Some(&SagaCoordinator::launch("a", "1").into()))).await;

        watcher(&store).catch_up().await.unwrap();
        let after_first = store.event_count().await;

        // a fresh checkpoint store replays the whole log
        watcher(&store).catch_up().await.unwrap();
        assert_eq!(store.event_count().await, after_first);
    }

    #[tokio::test]
    async fn run_reacts_to_notifications_and_stops_on_shutdown() {
        let store = InMemoryEventStore::new();
        let watcher = Arc::new(watcher(&store));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = {
            let watcher = watcher.clone();
            let subscription = store.subscribe_all();
            tokio::spawn(async move {
                watcher
                    .run(subscription, async {
                        let _ = stop_rx.await;
                    })
                    .await;
            })
        };

        let context = SagaCoordinator::launch("checkout", "capture");
        let step_id = context.get("checkout").unwrap().saga_step_id;
        append(&store, business_event(Some(&context.into()))).await;

        let mut state = None;
        for _ in 0..50 {
            state = watcher
                .service()
                .get_step(step_id)
                .await
                .unwrap()
                .map(|r| r.state);
            if state == Some(StepState::Processed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state, Some(StepState::Processed));

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
