//! Shared application state.

use std::sync::Arc;

use event_store::{CheckpointStore, EventBus, EventFilter, EventStore};
use projections::{BuilderConfig, ProjectionProcessor, ProjectionStore, SagaProjectionBuilder};
use step_tracking::{STEP_TRACKING_EVENT_TYPES, SagaEventWatcher, WatcherConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::ApiError;

/// Everything a handler needs: the local log, its watcher and the
/// projection pipeline reading from it.
pub struct AppState<S: EventStore + Clone> {
    pub event_store: S,
    pub watcher: SagaEventWatcher<S>,
    pub processor: ProjectionProcessor<S>,
    pub projections: Arc<dyn ProjectionStore>,
}

impl<S> AppState<S>
where
    S: EventStore + EventBus + Clone + 'static,
{
    /// Wires the watcher and projection processor over `event_store`.
    pub fn new(
        event_store: S,
        checkpoints: Arc<dyn CheckpointStore>,
        projections: Arc<dyn ProjectionStore>,
        config: &Config,
    ) -> Self {
        let watcher = SagaEventWatcher::new(
            event_store.clone(),
            checkpoints.clone(),
            WatcherConfig {
                name: config.watcher_name(),
                poll_interval: config.poll_interval,
            },
        );

        let mut processor =
            ProjectionProcessor::new(event_store.clone(), checkpoints, config.processor_name())
                .with_poll_interval(config.poll_interval);
        processor.register(Box::new(SagaProjectionBuilder::with_config(
            projections.clone(),
            BuilderConfig {
                max_retries: config.projection_max_retries,
            },
        )));

        Self {
            event_store,
            watcher,
            processor,
            projections,
        }
    }

    /// Brings step tracking and projections up to date with the log.
    pub async fn sync(&self) -> Result<(), ApiError> {
        self.watcher.catch_up().await?;
        self.processor.run_catch_up().await?;
        Ok(())
    }

    /// Spawns the watcher and processor loops; both stop once `true` is
    /// sent on the shutdown channel.
    pub fn spawn_background(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let watcher_state = Arc::clone(self);
        let watcher_subscription = self.event_store.subscribe_all();
        let watcher_shutdown = shutdown_requested(shutdown.clone());
        let watcher = tokio::spawn(async move {
            watcher_state
                .watcher
                .run(watcher_subscription, watcher_shutdown)
                .await;
        });

        let processor_state = Arc::clone(self);
        let processor_subscription = self
            .event_store
            .subscribe(EventFilter::event_types(STEP_TRACKING_EVENT_TYPES));
        let processor = tokio::spawn(async move {
            processor_state
                .processor
                .run(processor_subscription, shutdown_requested(shutdown))
                .await;
        });

        vec![watcher, processor]
    }
}

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    // a dropped sender also means shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}
