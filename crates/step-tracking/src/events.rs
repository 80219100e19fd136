//! Events emitted by the step tracking state machine.
//!
//! These are the only input of the projection builder, so each variant
//! carries the saga instance id together with everything needed to build or
//! complete a step view without reading the local step record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{SagaInstanceId, SagaStepId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// Event type of [`StepTrackingEvent::SagaStepLaunched`].
pub const STEP_LAUNCHED: &str = "SagaStepLaunched";
/// Event type of [`StepTrackingEvent::SagaStepInitiated`].
pub const STEP_INITIATED: &str = "SagaStepInitiated";
/// Event type of [`StepTrackingEvent::SagaStepProcessed`].
pub const STEP_PROCESSED: &str = "SagaStepProcessed";
/// Event type of [`StepTrackingEvent::SagaStepDefaultProcessed`].
pub const STEP_DEFAULT_PROCESSED: &str = "SagaStepDefaultProcessed";

/// All step tracking event types, for subscriptions.
pub const STEP_TRACKING_EVENT_TYPES: [&str; 4] = [
    STEP_LAUNCHED,
    STEP_INITIATED,
    STEP_PROCESSED,
    STEP_DEFAULT_PROCESSED,
];

/// State transitions of a saga step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepTrackingEvent {
    /// First step of a saga instance was seen.
    SagaStepLaunched(StepSeenData),

    /// A step with predecessors was seen.
    SagaStepInitiated(StepSeenData),

    /// The event carrying a launched or initiated step was confirmed.
    SagaStepProcessed(StepProcessedData),

    /// A reduced-context step was seen and confirmed at once.
    SagaStepDefaultProcessed(StepDefaultProcessedData),
}

impl DomainEvent for StepTrackingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StepTrackingEvent::SagaStepLaunched(_) => STEP_LAUNCHED,
            StepTrackingEvent::SagaStepInitiated(_) => STEP_INITIATED,
            StepTrackingEvent::SagaStepProcessed(_) => STEP_PROCESSED,
            StepTrackingEvent::SagaStepDefaultProcessed(_) => STEP_DEFAULT_PROCESSED,
        }
    }
}

impl StepTrackingEvent {
    /// The saga instance (or reduced correlation id) the step belongs to.
    pub fn saga_instance_id(&self) -> SagaInstanceId {
        match self {
            StepTrackingEvent::SagaStepLaunched(d) | StepTrackingEvent::SagaStepInitiated(d) => {
                d.saga_instance_id
            }
            StepTrackingEvent::SagaStepProcessed(d) => d.saga_instance_id,
            StepTrackingEvent::SagaStepDefaultProcessed(d) => d.saga_instance_id,
        }
    }

    /// The step the transition applies to.
    pub fn saga_step_id(&self) -> SagaStepId {
        match self {
            StepTrackingEvent::SagaStepLaunched(d) | StepTrackingEvent::SagaStepInitiated(d) => {
                d.saga_step_id
            }
            StepTrackingEvent::SagaStepProcessed(d) => d.saga_step_id,
            StepTrackingEvent::SagaStepDefaultProcessed(d) => d.saga_step_id,
        }
    }
}

/// Payload of the launched and initiated transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSeenData {
    pub saga_instance_id: SagaInstanceId,
    pub saga_step_id: SagaStepId,
    pub saga_name: String,
    pub step_name: String,
    /// Empty for launched steps.
    #[serde(default)]
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    /// Timestamp of the business event carrying the step.
    pub initiated_at: DateTime<Utc>,
}

/// Payload of the processed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProcessedData {
    pub saga_instance_id: SagaInstanceId,
    pub saga_step_id: SagaStepId,
    pub saga_name: Option<String>,
    /// Type of the business event that carried the step.
    pub event_name: String,
    pub processed_at: DateTime<Utc>,
}

/// Payload of the reduced-context transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefaultProcessedData {
    /// The reduced context's correlation id.
    pub saga_instance_id: SagaInstanceId,
    /// The reduced context's current event id.
    pub saga_step_id: SagaStepId,
    /// The causation id, if any.
    #[serde(default)]
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    pub event_name: String,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}
