//! Commands accepted by the step tracking state machine.

use chrono::{DateTime, Utc};
use common::{SagaInstanceId, SagaStepId};
use saga::{ReducedContext, StepMetadata};

/// Record that a named-saga step was seen (LAUNCHED or INITIATED).
#[derive(Debug, Clone)]
pub struct TrackStep {
    pub metadata: StepMetadata,
    pub initiated_at: DateTime<Utc>,
}

impl TrackStep {
    pub fn new(metadata: StepMetadata, initiated_at: DateTime<Utc>) -> Self {
        Self {
            metadata,
            initiated_at,
        }
    }
}

/// Confirm that the event carrying a step is durable.
#[derive(Debug, Clone)]
pub struct MarkProcessed {
    pub saga_instance_id: SagaInstanceId,
    pub saga_step_id: SagaStepId,
    pub event_name: String,
    pub processed_at: DateTime<Utc>,
}

impl MarkProcessed {
    /// Confirms the step described by `metadata`, processed now.
    pub fn for_step(metadata: &StepMetadata, event_name: impl Into<String>) -> Self {
        Self {
            saga_instance_id: metadata.saga_instance_id,
            saga_step_id: metadata.saga_step_id,
            event_name: event_name.into(),
            processed_at: Utc::now(),
        }
    }
}

/// Record a reduced-context step in a single transition.
#[derive(Debug, Clone)]
pub struct RecordDefaultProcessed {
    pub context: ReducedContext,
    pub event_name: String,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl RecordDefaultProcessed {
    pub fn new(
        context: ReducedContext,
        event_name: impl Into<String>,
        initiated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            context,
            event_name: event_name.into(),
            initiated_at,
            processed_at: Utc::now(),
        }
    }
}
