//! Application service for the step tracking state machine.

use common::SagaStepId;
use domain::{CommandHandler, CommandResult, DomainError, DomainEvent};
use event_store::EventStore;

use crate::aggregate::{SagaStep, StepRejection};
use crate::commands::{MarkProcessed, RecordDefaultProcessed, TrackStep};
use crate::error::{Result, StepTrackingError};
use crate::events::StepTrackingEvent;
use crate::record::StepRecord;

/// Attempts made when concurrent writers race on the same step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What a tracking command did.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingOutcome {
    /// A transition was recorded.
    Applied(StepTrackingEvent),
    /// The step was already past this transition.
    Noop,
}

impl TrackingOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, TrackingOutcome::Noop)
    }
}

/// Records saga step transitions in the local event log.
pub struct StepTrackingService<S: EventStore> {
    handler: CommandHandler<S, SagaStep>,
    max_attempts: u32,
}

impl<S: EventStore> StepTrackingService<S> {
    /// Creates a new step tracking service.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Overrides how many times a conflicting append is attempted.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Records LAUNCHED or INITIATED for a named-saga step.
    #[tracing::instrument(skip(self, cmd), fields(step = %cmd.metadata.saga_step_id))]
    pub async fn track_step(&self, cmd: TrackStep) -> Result<TrackingOutcome> {
        self.run(cmd.metadata.saga_step_id, |step| step.track(&cmd))
            .await
    }

    /// Records PROCESSED for a launched or initiated step.
    #[tracing::instrument(skip(self, cmd), fields(step = %cmd.saga_step_id))]
    pub async fn mark_processed(&self, cmd: MarkProcessed) -> Result<TrackingOutcome> {
        self.run(cmd.saga_step_id, |step| step.mark_processed(&cmd))
            .await
    }

    /// Records DEFAULT_PROCESSED for a reduced-context step.
    #[tracing::instrument(skip(self, cmd), fields(step = %cmd.context.current_event_id))]
    pub async fn record_default_processed(
        &self,
        cmd: RecordDefaultProcessed,
    ) -> Result<TrackingOutcome> {
        self.run(cmd.context.current_event_id, |step| {
            step.record_default_processed(&cmd)
        })
        .await
    }

    /// Returns the local record of a step, if tracked.
    pub async fn get_step(&self, step: SagaStepId) -> Result<Option<StepRecord>> {
        let aggregate = self.handler.load(SagaStep::aggregate_id(step)).await?;
        Ok(aggregate.record().cloned())
    }

    async fn run<F>(&self, step: SagaStepId, decide: F) -> Result<TrackingOutcome>
    where
        F: Fn(&SagaStep) -> std::result::Result<Vec<StepTrackingEvent>, StepRejection>,
    {
        let aggregate_id = SagaStep::aggregate_id(step);

        for attempt in 1..=self.max_attempts {
            match self.handler.execute(aggregate_id, &decide).await {
                Ok(CommandResult { mut events, .. }) => {
                    let Some(event) = events.pop() else {
                        tracing::debug!(%step, "step already past this transition");
                        metrics::counter!("saga_steps_noop_total").increment(1);
                        return Ok(TrackingOutcome::Noop);
                    };
                    metrics::counter!("saga_steps_tracked_total", "transition" => event.event_type())
                        .increment(1);
                    return Ok(TrackingOutcome::Applied(event));
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(%step, attempt, "concurrent step update, retrying");
                }
                Err(DomainError::Rejected { reason, .. }) => {
                    return Err(StepTrackingError::Rejected(reason));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StepTrackingError::RetriesExhausted {
            step,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StepState;
    use chrono::Utc;
    use event_store::InMemoryEventStore;
    use saga::{ReducedContext, SagaCoordinator, StepMetadata};

    fn launched() -> StepMetadata {
        SagaCoordinator::launch("checkout", "place")
            .get("checkout")
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn track_then_process() {
        let service = StepTrackingService::new(InMemoryEventStore::new());
        let meta = launched();

        let outcome = service
            .track_step(TrackStep::new(meta.clone(), Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TrackingOutcome::Applied(StepTrackingEvent::SagaStepLaunched(_))
        ));

        service
            .mark_processed(MarkProcessed::for_step(&meta, "OrderPlaced"))
            .await
            .unwrap();

        let record = service.get_step(meta.saga_step_id).await.unwrap().unwrap();
        assert_eq!(record.state, StepState::Processed);
        assert_eq!(record.step_name.as_deref(), Some("place"));
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let store = InMemoryEventStore::new();
        let service = StepTrackingService::new(store.clone());
        let meta = launched();
        let track = TrackStep::new(meta.clone(), Utc::now());
        let processed = MarkProcessed::for_step(&meta, "OrderPlaced");

        service.track_step(track.clone()).await.unwrap();
        service.mark_processed(processed.clone()).await.unwrap();
        let once = service.get_step(meta.saga_step_id).await.unwrap();

        assert!(service.track_step(track).await.unwrap().is_noop());
        assert!(service.mark_processed(processed).await.unwrap().is_noop());

        assert_eq!(service.get_step(meta.saga_step_id).await.unwrap(), once);
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_duplicates_create_one_record() {
        let store = InMemoryEventStore::new();
        let service = std::sync::Arc::new(StepTrackingService::new(store.clone()));
        let meta = launched();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let service = service.clone();
            let cmd = TrackStep::new(meta.clone(), Utc::now());
            handles.push(tokio::spawn(async move { service.track_step(cmd).await }));
        }
        let mut applied = 0;
        for handle in handles {
            if !handle.await.unwrap().unwrap().is_noop() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn processing_unknown_step_is_rejected() {
        let service = StepTrackingService::new(InMemoryEventStore::new());
        let result = service
            .mark_processed(MarkProcessed::for_step(&launched(), "OrderPlaced"))
            .await;
        assert!(matches!(result, Err(StepTrackingError::Rejected(_))));
    }

    #[tokio::test]
    async fn reduced_step_is_recorded_once() {
        let store = InMemoryEventStore::new();
        let service = StepTrackingService::new(store.clone());
        let cmd = RecordDefaultProcessed::new(ReducedContext::launch(), "Shipped", Utc::now());

        assert!(
            !service
                .record_default_processed(cmd.clone())
                .await
                .unwrap()
                .is_noop()
        );
        assert!(
            service
                .record_default_processed(cmd)
                .await
                .unwrap()
                .is_noop()
        );
        assert_eq!(store.event_count().await, 1);
    }
}
