//! Saga context model and coordinator for choreographed sagas.
//!
//! Every event taking part in a saga carries [`SagaMetadata`] naming the saga
//! instance and step it belongs to, plus the step(s) that caused it. This
//! crate provides:
//! - [`SagaContext`] and [`StepMetadata`] with their fallible merge
//! - [`ReducedContext`], the unnamed correlation/causation variant
//! - [`SagaCoordinator`], a stateless builder for launching sagas and
//!   deriving the context of the next step
//! - [`extract_metadata`] for reading the metadata back off an event

pub mod context;
pub mod coordinator;
pub mod error;
pub mod metadata;

pub use context::{SagaContext, StepMetadata, merge_all};
pub use coordinator::{SagaCoordinator, StepBuilder};
pub use error::{Result, SagaError};
pub use metadata::{
    ReducedContext, SAGA_METADATA_KEY, SagaMetadata, attach_metadata, extract_metadata,
};
