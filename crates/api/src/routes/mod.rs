//! HTTP handlers, one module per resource.

pub mod contexts;
pub mod events;
pub mod ops;
pub mod sagas;
