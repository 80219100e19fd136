//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use event_store::EventStoreError;
use projections::ProjectionError;
use saga::SagaError;
use step_tracking::StepTrackingError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Context algebra error.
    Saga(SagaError),
    /// Event log error.
    EventStore(EventStoreError),
    /// Step tracking failed while catching up.
    StepTracking(StepTrackingError),
    /// Projection update or read failed.
    Projection(ProjectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::EventStore(err) if err.is_conflict() => (StatusCode::CONFLICT, err.to_string()),
            ApiError::EventStore(err) => internal(err.to_string()),
            ApiError::StepTracking(err) => internal(err.to_string()),
            ApiError::Projection(err) => internal(err.to_string()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn internal(message: String) -> (StatusCode, String) {
    tracing::error!(error = %message, "internal server error");
    (StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::InstanceMismatch { .. } | SagaError::SagaAlreadyPresent(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SagaError::UnknownSaga(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        SagaError::MalformedMetadata(_) => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::EventStore(err)
    }
}

impl From<StepTrackingError> for ApiError {
    fn from(err: StepTrackingError) -> Self {
        ApiError::StepTracking(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}
