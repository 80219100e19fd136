//! Saga execution graphs, the query side of saga tracking.
//!
//! - [`SagaProjection`] is one document per saga instance: its steps, their
//!   predecessors and timestamps, with graph traversal helpers
//! - [`SagaProjectionBuilder`] folds step tracking events from many services
//!   into those documents with optimistic, retried updates
//! - [`ProjectionStore`] persists the documents (in memory or PostgreSQL)
//! - [`ProjectionProcessor`] feeds a service's event log to projections from a
//!   durable checkpoint

pub mod builder;
pub mod document;
pub mod error;
pub mod postgres;
pub mod processor;
pub mod projection;
pub mod store;

pub use builder::{BuilderConfig, SagaProjectionBuilder};
pub use document::{SagaProjection, SagaStepView};
pub use error::{ProjectionError, Result};
pub use postgres::PostgresProjectionStore;
pub use processor::ProjectionProcessor;
pub use projection::Projection;
pub use store::{InMemoryProjectionStore, ProjectionCollection, ProjectionStore, Versioned};
