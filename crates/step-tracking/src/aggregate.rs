//! The `SagaStep` aggregate, one per saga step id.
//!
//! The step id is the idempotency key: the aggregate id is derived from it,
//! so re-delivered commands for the same step always meet the same record.

use std::collections::BTreeSet;

use common::{AggregateId, SagaInstanceId, SagaStepId};
use domain::{Aggregate, DomainError};
use event_store::Version;
use thiserror::Error;

use crate::commands::{MarkProcessed, RecordDefaultProcessed, TrackStep};
use crate::events::{StepDefaultProcessedData, StepProcessedData, StepSeenData, StepTrackingEvent};
use crate::record::{StepRecord, StepState};

/// Aggregate type of step tracking events in the local log.
pub const SAGA_STEP_AGGREGATE_TYPE: &str = "SagaStep";

/// Reasons a step tracking command is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StepRejection {
    /// The command names another saga instance than the recorded step.
    #[error("step {step} belongs to instance {recorded}, not {requested}")]
    InstanceMismatch {
        step: SagaStepId,
        recorded: SagaInstanceId,
        requested: SagaInstanceId,
    },

    /// Confirmation of a step that was never tracked.
    #[error("step {0} is not tracked")]
    NotTracked(SagaStepId),
}

impl From<StepRejection> for DomainError {
    fn from(e: StepRejection) -> Self {
        DomainError::rejected(SAGA_STEP_AGGREGATE_TYPE, e)
    }
}

/// Event-sourced state of one saga step.
#[derive(Debug, Clone, Default)]
pub struct SagaStep {
    record: Option<StepRecord>,
    version: Version,
}

impl SagaStep {
    /// Aggregate id under which `step` is stored.
    pub fn aggregate_id(step: SagaStepId) -> AggregateId {
        AggregateId::from(step)
    }

    pub fn record(&self) -> Option<&StepRecord> {
        self.record.as_ref()
    }

    pub fn state(&self) -> Option<StepState> {
        self.record.as_ref().map(|r| r.state)
    }

    fn check_instance(&self, requested: SagaInstanceId) -> Result<(), StepRejection> {
        match &self.record {
            Some(record) if record.saga_instance_id != requested => {
                Err(StepRejection::InstanceMismatch {
                    step: record.saga_step_id,
                    recorded: record.saga_instance_id,
                    requested,
                })
            }
            _ => Ok(()),
        }
    }

    /// LAUNCHED for a first step, INITIATED otherwise; no-op once recorded.
    pub fn track(&self, cmd: &TrackStep) -> Result<Vec<StepTrackingEvent>, StepRejection> {
        self.check_instance(cmd.metadata.saga_instance_id)?;
        if self.record.is_some() {
            return Ok(vec![]);
        }

        let data = StepSeenData {
            saga_instance_id: cmd.metadata.saga_instance_id,
            saga_step_id: cmd.metadata.saga_step_id,
            saga_name: cmd.metadata.saga_name.clone(),
            step_name: cmd.metadata.step_name.clone(),
            prev_steps_ids: cmd.metadata.prev_steps_ids.clone(),
            initiated_at: cmd.initiated_at,
        };
        let event = if cmd.metadata.is_first_step() {
            StepTrackingEvent::SagaStepLaunched(data)
        } else {
            StepTrackingEvent::SagaStepInitiated(data)
        };
        Ok(vec![event])
    }

    /// PROCESSED for a launched or initiated step; no-op once terminal.
    pub fn mark_processed(
        &self,
        cmd: &MarkProcessed,
    ) -> Result<Vec<StepTrackingEvent>, StepRejection> {
        let Some(record) = &self.record else {
            return Err(StepRejection::NotTracked(cmd.saga_step_id));
        };
        self.check_instance(cmd.saga_instance_id)?;
        if record.is_terminal() {
            return Ok(vec![]);
        }

        Ok(vec![StepTrackingEvent::SagaStepProcessed(
            StepProcessedData {
                saga_instance_id: cmd.saga_instance_id,
                saga_step_id: cmd.saga_step_id,
                saga_name: record.saga_name.clone(),
                event_name: cmd.event_name.clone(),
                processed_at: cmd.processed_at,
            },
        )])
    }

    /// DEFAULT_PROCESSED for an unseen reduced step; no-op once recorded.
    pub fn record_default_processed(
        &self,
        cmd: &RecordDefaultProcessed,
    ) -> Result<Vec<StepTrackingEvent>, StepRejection> {
        self.check_instance(cmd.context.correlation_id)?;
        if self.record.is_some() {
            return Ok(vec![]);
        }

        Ok(vec![StepTrackingEvent::SagaStepDefaultProcessed(
            StepDefaultProcessedData {
                saga_instance_id: cmd.context.correlation_id,
                saga_step_id: cmd.context.current_event_id,
                prev_steps_ids: causation_set(cmd.context.causation_id),
                event_name: cmd.event_name.clone(),
                initiated_at: cmd.initiated_at,
                processed_at: cmd.processed_at,
            },
        )])
    }
}

impl Aggregate for SagaStep {
    type Event = StepTrackingEvent;
    type Error = StepRejection;

    fn aggregate_type() -> &'static str {
        SAGA_STEP_AGGREGATE_TYPE
    }

    fn id(&self) -> Option<AggregateId> {
        self.record
            .as_ref()
            .map(|r| SagaStep::aggregate_id(r.saga_step_id))
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StepTrackingEvent::SagaStepLaunched(d) => self.seen(d, StepState::Launched),
            StepTrackingEvent::SagaStepInitiated(d) => self.seen(d, StepState::Initiated),
            StepTrackingEvent::SagaStepProcessed(d) => {
                if let Some(record) = self.record.as_mut()
                    && !record.is_terminal()
                {
                    record.state = StepState::Processed;
                    record.event_name = Some(d.event_name);
                    record.processed_at = Some(d.processed_at);
                }
            }
            StepTrackingEvent::SagaStepDefaultProcessed(d) => {
                if self.record.is_none() {
                    self.record = Some(StepRecord {
                        saga_instance_id: d.saga_instance_id,
                        saga_step_id: d.saga_step_id,
                        saga_name: None,
                        step_name: None,
                        prev_steps_ids: d.prev_steps_ids,
                        state: StepState::DefaultProcessed,
                        event_name: Some(d.event_name),
                        initiated_at: d.initiated_at,
                        processed_at: Some(d.processed_at),
                    });
                }
            }
        }
    }
}

impl SagaStep {
    fn seen(&mut self, d: StepSeenData, state: StepState) {
        if self.record.is_some() {
            return;
        }
        self.record = Some(StepRecord {
            saga_instance_id: d.saga_instance_id,
            saga_step_id: d.saga_step_id,
            saga_name: Some(d.saga_name),
            step_name: Some(d.step_name),
            prev_steps_ids: d.prev_steps_ids,
            state,
            event_name: None,
            initiated_at: d.initiated_at,
            processed_at: None,
        });
    }
}

/// Predecessors of a reduced step as a set.
pub fn causation_set(causation_id: Option<SagaStepId>) -> BTreeSet<SagaStepId> {
    causation_id.into_iter().collect()
}
