//! The local record of a saga step.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use common::{SagaInstanceId, SagaStepId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked step.
///
/// ```text
/// absent ──► Launched ──┐
/// absent ──► Initiated ─┴─► Processed
/// absent ──► DefaultProcessed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    /// First step of a saga, seen but not yet confirmed.
    Launched,
    /// Later step (has predecessors), seen but not yet confirmed.
    Initiated,
    /// The event carrying the step was confirmed durable.
    Processed,
    /// Reduced-context step, recorded in one go.
    DefaultProcessed,
}

impl StepState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Processed | StepState::DefaultProcessed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::Launched => "LAUNCHED",
            StepState::Initiated => "INITIATED",
            StepState::Processed => "PROCESSED",
            StepState::DefaultProcessed => "DEFAULT_PROCESSED",
        };
        write!(f, "{s}")
    }
}

/// Everything one service knows about one saga step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub saga_instance_id: SagaInstanceId,
    pub saga_step_id: SagaStepId,
    pub saga_name: Option<String>,
    pub step_name: Option<String>,
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    pub state: StepState,
    pub event_name: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
