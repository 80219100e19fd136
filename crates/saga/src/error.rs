//! Saga error types.

use common::SagaInstanceId;
use thiserror::Error;

/// Errors that can occur while building or reading saga contexts.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Two contexts claim different instances of the same saga.
    #[error(
        "Saga '{saga_name}' instance mismatch: {expected} cannot be combined with {found}"
    )]
    InstanceMismatch {
        saga_name: String,
        expected: SagaInstanceId,
        found: SagaInstanceId,
    },

    /// A step was requested for a saga none of the given contexts carries.
    #[error("Saga '{0}' is not present in the given context")]
    UnknownSaga(String),

    /// A nested saga was launched under a name that is already running.
    #[error("Saga '{0}' is already present in the given context")]
    SagaAlreadyPresent(String),

    /// Saga metadata attached to an event could not be decoded.
    #[error("Malformed saga metadata: {0}")]
    MalformedMetadata(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true when the error reports an instance-id disagreement.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, SagaError::InstanceMismatch { .. })
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
