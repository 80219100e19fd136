//! The saga coordinator over HTTP, for participants that do not link the
//! `saga` crate.
//!
//! Responses are [`SagaMetadata`] documents ready to be attached to an
//! event; requests accept those same documents back.

use axum::Json;
use saga::{ReducedContext, SagaContext, SagaCoordinator, SagaMetadata};
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LaunchRequest {
    pub saga_name: String,
    pub step_name: String,
}

#[derive(Deserialize)]
pub struct StepRequest {
    /// Contexts of every event that causes the step.
    pub contexts: Vec<SagaContext>,
    pub saga_name: String,
    pub step_name: String,
    /// Start `saga_name` as a nested saga instead of continuing it.
    #[serde(default)]
    pub nested: bool,
}

#[derive(Deserialize)]
pub struct MergeRequest {
    pub contexts: Vec<SagaContext>,
}

#[derive(Deserialize, Default)]
pub struct ReducedRequest {
    /// Context of the causing event; absent to start a new chain.
    #[serde(default)]
    pub previous: Option<ReducedContext>,
}

fn require_names(saga_name: &str, step_name: &str) -> Result<(), ApiError> {
    if saga_name.trim().is_empty() || step_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "saga_name and step_name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// POST /contexts/launch: context of the first step of a new saga.
#[tracing::instrument(skip(req), fields(saga = %req.saga_name))]
pub async fn launch(Json(req): Json<LaunchRequest>) -> Result<Json<SagaMetadata>, ApiError> {
    require_names(&req.saga_name, &req.step_name)?;
    let context = SagaCoordinator::launch(req.saga_name, req.step_name);
    Ok(Json(SagaMetadata::Named(context)))
}

/// POST /contexts/step: context of the next step given its causes.
#[tracing::instrument(skip(req), fields(saga = %req.saga_name, causes = req.contexts.len()))]
pub async fn step(Json(req): Json<StepRequest>) -> Result<Json<SagaMetadata>, ApiError> {
    require_names(&req.saga_name, &req.step_name)?;
    if req.contexts.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one preceding context is required".to_string(),
        ));
    }

    let builder = SagaCoordinator::combine(&req.contexts);
    let context = if req.nested {
        builder.launch_nested(&req.saga_name, &req.step_name)?
    } else {
        builder.perform_step(&req.saga_name, &req.step_name)?
    };
    Ok(Json(SagaMetadata::Named(context)))
}

/// POST /contexts/merge: union of several contexts.
#[tracing::instrument(skip(req), fields(contexts = req.contexts.len()))]
pub async fn merge(Json(req): Json<MergeRequest>) -> Result<Json<SagaMetadata>, ApiError> {
    let context = SagaCoordinator::merge(&req.contexts)?;
    Ok(Json(SagaMetadata::Named(context)))
}

/// POST /contexts/reduced: start or continue a reduced chain.
pub async fn reduced(Json(req): Json<ReducedRequest>) -> Json<SagaMetadata> {
    let context = match req.previous {
        Some(previous) => previous.next(),
        None => SagaCoordinator::launch_reduced(),
    };
    Json(SagaMetadata::Reduced(context))
}
