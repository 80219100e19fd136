//! Core projection trait.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// A projection that folds events of a log into a read model.
///
/// Handlers must be idempotent: the processor delivers at-least-once, and
/// after a crash the last event before the checkpoint is handled again.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Returns the name of this projection.
    fn name(&self) -> &'static str;

    /// Handles a single event, updating the projection's read model.
    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    /// Resets the projection to its initial state.
    async fn reset(&self) -> Result<()>;
}
