//! Event ingestion for participants that only publish into the local log.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{AppendOptions, EventBus, EventEnvelope, EventStore, Version};
use saga::{SagaMetadata, attach_metadata};
use serde::{Deserialize, Serialize};
use step_tracking::{SAGA_STEP_AGGREGATE_TYPE, STEP_TRACKING_EVENT_TYPES};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AppendEventRequest {
    /// Appends to an existing aggregate when set, starts a new one otherwise.
    pub aggregate_id: Option<AggregateId>,
    pub aggregate_type: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Saga metadata as returned by the `/contexts` endpoints.
    pub saga: Option<SagaMetadata>,
}

#[derive(Serialize)]
pub struct AppendEventResponse {
    pub event_id: String,
    pub aggregate_id: AggregateId,
    pub version: i64,
}

/// Response type for event envelope data.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// POST /events: append a business event to the local log.
#[tracing::instrument(skip(state, req), fields(event_type = %req.event_type))]
pub async fn append<S: EventStore + EventBus + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<AppendEventRequest>,
) -> Result<(StatusCode, Json<AppendEventResponse>), ApiError> {
    if req.aggregate_type.is_empty() || req.event_type.is_empty() {
        return Err(ApiError::BadRequest(
            "aggregate_type and event_type must not be empty".to_string(),
        ));
    }
    if req.aggregate_type == SAGA_STEP_AGGREGATE_TYPE {
        return Err(ApiError::BadRequest(format!(
            "aggregate type {SAGA_STEP_AGGREGATE_TYPE} is reserved"
        )));
    }
    if STEP_TRACKING_EVENT_TYPES.contains(&req.event_type.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "event type {} is reserved",
            req.event_type
        )));
    }

    let aggregate_id = req.aggregate_id.unwrap_or_default();
    let current = state
        .event_store
        .get_aggregate_version(aggregate_id)
        .await?
        .unwrap_or(Version::initial());

    let mut envelope = EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type(req.aggregate_type)
        .event_type(req.event_type)
        .version(current.next())
        .payload_raw(req.payload)
        .build()?;
    if let Some(saga) = &req.saga {
        attach_metadata(&mut envelope, saga)?;
    }
    let event_id = envelope.event_id.to_string();

    let version = state
        .event_store
        .append(vec![envelope], AppendOptions::expect_version(current))
        .await?;
    let with_saga = if req.saga.is_some() { "yes" } else { "no" };
    metrics::counter!("api_events_appended_total", "saga" => with_saga).increment(1);

    Ok((
        StatusCode::CREATED,
        Json(AppendEventResponse {
            event_id,
            aggregate_id,
            version: version.as_i64(),
        }),
    ))
}

/// GET /aggregates/{id}/events: list all events of an aggregate.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + EventBus + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let aggregate_id: AggregateId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;

    let envelopes = state
        .event_store
        .get_events_for_aggregate(aggregate_id)
        .await?;

    let responses = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            aggregate_id: e.aggregate_id.to_string(),
            aggregate_type: e.aggregate_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp,
            metadata: serde_json::to_value(&e.metadata).unwrap_or_default(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}
