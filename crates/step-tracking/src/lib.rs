//! Per-service tracking of saga steps.
//!
//! Each service keeps a [`SagaStep`] aggregate per saga step id in its own
//! event log. The [`SagaEventWatcher`] reads that log, picks up the saga
//! metadata attached to business events and drives the steps through
//! LAUNCHED / INITIATED, PROCESSED or DEFAULT_PROCESSED. The resulting
//! [`StepTrackingEvent`]s are what the projection builder consumes.

pub mod aggregate;
pub mod commands;
pub mod error;
pub mod events;
pub mod record;
pub mod service;
pub mod watcher;

pub use aggregate::{SAGA_STEP_AGGREGATE_TYPE, SagaStep, StepRejection};
pub use commands::{MarkProcessed, RecordDefaultProcessed, TrackStep};
pub use error::{Result, StepTrackingError};
pub use events::{
    STEP_DEFAULT_PROCESSED, STEP_INITIATED, STEP_LAUNCHED, STEP_PROCESSED,
    STEP_TRACKING_EVENT_TYPES, StepDefaultProcessedData, StepProcessedData, StepSeenData,
    StepTrackingEvent,
};
pub use record::{StepRecord, StepState};
pub use service::{StepTrackingService, TrackingOutcome};
pub use watcher::{SagaEventWatcher, WatchOutcome, WatcherConfig};
