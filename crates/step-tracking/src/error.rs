//! Step tracking error types.

use common::SagaStepId;
use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while tracking saga steps.
#[derive(Debug, Error)]
pub enum StepTrackingError {
    /// The step aggregate refused the command.
    #[error("Step command rejected: {0}")]
    Rejected(String),

    /// Concurrent writers kept winning the append race.
    #[error("Step {step} still conflicting after {attempts} attempts")]
    RetriesExhausted { step: SagaStepId, attempts: u32 },

    /// Loading or appending the step aggregate failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Reading the event log or checkpoints failed.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

/// Convenience type alias for step tracking results.
pub type Result<T> = std::result::Result<T, StepTrackingError>;
