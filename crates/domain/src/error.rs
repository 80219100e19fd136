//! Domain error types.

use event_store::EventStoreError;
use saga::SagaError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Saga metadata could not be attached or read.
    #[error("Saga metadata error: {0}")]
    Saga(#[from] SagaError),

    /// The aggregate rejected the command.
    #[error("{aggregate_type} rejected command: {reason}")]
    Rejected {
        aggregate_type: &'static str,
        reason: String,
    },

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Wraps an aggregate's business error.
    pub fn rejected(aggregate_type: &'static str, reason: impl std::fmt::Display) -> Self {
        DomainError::Rejected {
            aggregate_type,
            reason: reason.to_string(),
        }
    }

    /// Returns true for optimistic concurrency failures on append.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
