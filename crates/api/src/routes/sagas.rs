//! Saga execution graph queries.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{SagaInstanceId, SagaStepId};
use event_store::{EventBus, EventStore};
use projections::{ProjectionCollection, ProjectionStore, SagaProjection, SagaStepView};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SagaSummaryResponse {
    pub saga_instance_id: SagaInstanceId,
    pub saga_name: Option<String>,
    pub steps: usize,
    pub pending_steps: usize,
    pub complete: bool,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_instance_id: SagaInstanceId,
    pub saga_name: Option<String>,
    pub complete: bool,
    /// Predecessors first.
    pub steps: Vec<StepResponse>,
}

#[derive(Serialize)]
pub struct StepResponse {
    pub saga_step_id: SagaStepId,
    pub step_name: Option<String>,
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
    pub pending: bool,
}

impl From<&SagaStepView> for StepResponse {
    fn from(view: &SagaStepView) -> Self {
        Self {
            saga_step_id: view.saga_step_id,
            step_name: view.step_name.clone(),
            prev_steps_ids: view.prev_steps_ids.clone(),
            initiated_at: view.initiated_at,
            processed_at: view.processed_at,
            event_name: view.event_name.clone(),
            pending: view.is_placeholder() || !view.is_processed(),
        }
    }
}

impl From<&SagaProjection> for SagaResponse {
    fn from(doc: &SagaProjection) -> Self {
        Self {
            saga_instance_id: doc.saga_instance_id,
            saga_name: doc.saga_name.clone(),
            complete: doc.is_complete(),
            steps: doc
                .topological_order()
                .into_iter()
                .map(StepResponse::from)
                .collect(),
        }
    }
}

/// GET /sagas: list named sagas with their progress.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + EventBus + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SagaSummaryResponse>>, ApiError> {
    state.sync().await?;

    let sagas = state.projections.list(ProjectionCollection::Named).await?;
    let summaries = sagas
        .iter()
        .map(|doc| SagaSummaryResponse {
            saga_instance_id: doc.saga_instance_id,
            saga_name: doc.saga_name.clone(),
            steps: doc.steps.len(),
            pending_steps: doc.pending_steps().len(),
            complete: doc.is_complete(),
        })
        .collect();

    Ok(Json(summaries))
}

/// GET /sagas/{id}: the execution graph of one named saga.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + EventBus + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    load(&state, ProjectionCollection::Named, &id).await
}

/// GET /reduced-sagas/{id}: the chain recorded for a correlation id.
#[tracing::instrument(skip(state))]
pub async fn get_reduced<S: EventStore + EventBus + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    load(&state, ProjectionCollection::Reduced, &id).await
}

async fn load<S: EventStore + EventBus + Clone + 'static>(
    state: &AppState<S>,
    collection: ProjectionCollection,
    id: &str,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_instance_id: SagaInstanceId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;

    state.sync().await?;

    let doc = state
        .projections
        .load(collection, saga_instance_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(SagaResponse::from(&doc.value)))
}
