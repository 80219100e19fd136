//! HTTP service for saga tracking.
//!
//! Exposes the saga coordinator to non-Rust participants, accepts business
//! events into the local log, and serves the saga execution graphs built
//! from it, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::{EventBus, EventStore, InMemoryCheckpointStore, InMemoryEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::InMemoryProjectionStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + EventBus + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/sagas", get(routes::sagas::list::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/reduced-sagas/{id}", get(routes::sagas::get_reduced::<S>))
        .route("/contexts/launch", post(routes::contexts::launch))
        .route("/contexts/step", post(routes::contexts::step))
        .route("/contexts/merge", post(routes::contexts::merge))
        .route("/contexts/reduced", post(routes::contexts::reduced))
        .route("/events", post(routes::events::append::<S>))
        .route("/aggregates/{id}/events", get(routes::events::list::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state on in-memory stores.
pub fn create_in_memory_state(config: &Config) -> Arc<AppState<InMemoryEventStore>> {
    Arc::new(AppState::new(
        InMemoryEventStore::new(),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryProjectionStore::new()),
        config,
    ))
}
