//! Projection error types.

use common::SagaInstanceId;
use thiserror::Error;

use crate::store::ProjectionCollection;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// Failed to deserialize an event payload or a stored document.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The projection store database failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another writer saved the document first.
    #[error("{collection} document {saga_instance_id} changed concurrently")]
    Conflict {
        collection: ProjectionCollection,
        saga_instance_id: SagaInstanceId,
    },

    /// Conflicting writers kept winning until the retry budget ran out.
    #[error("Gave up updating {saga_instance_id} after {attempts} attempts")]
    RetriesExhausted {
        saga_instance_id: SagaInstanceId,
        attempts: u32,
    },

    /// A projection-specific error.
    #[error("Projection error: {0}")]
    Projection(String),
}

impl ProjectionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProjectionError::Conflict { .. })
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
