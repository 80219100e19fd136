//! Projection processor for feeding events to projections.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use event_store::{CheckpointStore, Delivery, EventEnvelope, EventStore, LogPosition, Subscription};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Processes events from an event store and delivers them to projections.
///
/// The processor supports:
/// - Catch-up: resumes from a durable checkpoint and replays what follows
/// - Single event delivery: delivers one event to all projections
/// - Rebuild: resets all projections and replays from the start of the log
/// - Run: catches up on every notification or poll tick until shutdown
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    checkpoints: Arc<dyn CheckpointStore>,
    name: String,
    poll_interval: Duration,
    projections: Vec<Box<dyn Projection>>,
    catch_up_lock: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    /// Creates a processor whose progress is saved under `name`.
    pub fn new(store: S, checkpoints: Arc<dyn CheckpointStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            checkpoints,
            name: name.into(),
            poll_interval: Duration::from_millis(500),
            projections: Vec::new(),
            catch_up_lock: Mutex::new(()),
        }
    }

    /// Overrides the catch-up interval used by [`Self::run`].
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delivers every event after the checkpoint, saving it after each one.
    ///
    /// Returns the number of events delivered.
    #[tracing::instrument(skip(self), fields(processor = %self.name))]
    pub async fn run_catch_up(&self) -> Result<usize> {
        let _guard = self.catch_up_lock.lock().await;

        let mut position = self
            .checkpoints
            .load(&self.name)
            .await?
            .unwrap_or(LogPosition::zero());
        let mut stream = self.store.stream_all_events_from(position).await?;

        let mut delivered = 0;
        while let Some(result) = stream.next().await {
            let event = result?;
            self.process_event(&event).await?;
            position = position.advance();
            self.checkpoints.save(&self.name, position).await?;
            delivered += 1;
        }

        if delivered > 0 {
            tracing::info!(events_processed = delivered, %position, "catch-up complete");
        }

        Ok(delivered)
    }

    /// Delivers a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
            metrics::counter!("projections_events_processed", "projection" => projection.name())
                .increment(1);
        }
        Ok(())
    }

    /// Resets all projections and replays all events from the store.
    #[tracing::instrument(skip(self), fields(processor = %self.name))]
    pub async fn rebuild_all(&self) -> Result<usize> {
        {
            let _guard = self.catch_up_lock.lock().await;
            for projection in &self.projections {
                projection.reset().await?;
            }
            self.checkpoints.save(&self.name, LogPosition::zero()).await?;
        }
        self.run_catch_up().await
    }

    /// Runs until `shutdown` resolves or the log goes away.
    ///
    /// Failures are logged and retried on the next pass; the checkpoint only
    /// moves past events every projection handled.
    pub async fn run(&self, mut subscription: Subscription, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(processor = %self.name, "projection processor started");

        loop {
            if let Err(error) = self.run_catch_up().await {
                tracing::warn!(processor = %self.name, %error, "projection catch-up failed");
            }

            tokio::select! {
                _ = &mut shutdown => break,
                delivery = subscription.recv() => match delivery {
                    Some(Delivery::Event(_)) => {}
                    Some(Delivery::Lagged(missed)) => {
                        tracing::debug!(missed, "projection notifications lagged");
                    }
                    None => break,
                },
                _ = ticker.tick() => {}
            }
        }

        tracing::info!(processor = %self.name, "projection processor stopped");
    }
}
