//! Stateless builder of saga contexts.
//!
//! Participants never talk to a coordinator process: they build the context
//! for the step they are about to perform from the context(s) of the event(s)
//! that caused it, and attach the result to the event they emit.
//!
//! ```
//! use saga::SagaCoordinator;
//!
//! let placed = SagaCoordinator::launch("checkout", "place-order");
//! let paid = SagaCoordinator::given(&placed)
//!     .perform_step("checkout", "capture-payment")
//!     .unwrap();
//!
//! let prev = &paid.get("checkout").unwrap().prev_steps_ids;
//! assert!(prev.contains(&placed.get("checkout").unwrap().saga_step_id));
//! ```

use std::collections::BTreeSet;

use common::SagaStepId;

use crate::context::{SagaContext, StepMetadata, merge_all};
use crate::error::{Result, SagaError};
use crate::metadata::ReducedContext;

/// Entry point for building saga contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SagaCoordinator;

impl SagaCoordinator {
    /// Starts a new saga instance with its first step.
    pub fn launch(saga_name: impl Into<String>, step_name: impl Into<String>) -> SagaContext {
        let context = SagaContext::single(StepMetadata::first(saga_name, step_name));
        metrics::counter!("saga_contexts_launched_total").increment(1);
        context
    }

    /// Starts a new reduced (unnamed) saga.
    pub fn launch_reduced() -> ReducedContext {
        ReducedContext::launch()
    }

    /// Continues from the context of a single preceding event.
    pub fn given(context: &SagaContext) -> StepBuilder {
        StepBuilder {
            contexts: vec![context.clone()],
        }
    }

    /// Continues from the contexts of several preceding events (a join).
    pub fn combine<'a, I>(contexts: I) -> StepBuilder
    where
        I: IntoIterator<Item = &'a SagaContext>,
    {
        StepBuilder {
            contexts: contexts.into_iter().cloned().collect(),
        }
    }

    /// Merges contexts left to right. See [`SagaContext::merge`].
    pub fn merge<'a, I>(contexts: I) -> Result<SagaContext>
    where
        I: IntoIterator<Item = &'a SagaContext>,
    {
        merge_all(contexts)
    }
}

/// The preceding contexts a new step is derived from.
#[derive(Debug, Clone)]
pub struct StepBuilder {
    contexts: Vec<SagaContext>,
}

impl StepBuilder {
    /// Builds the context of the next step of `saga_name`.
    ///
    /// The new entry keeps the saga's instance id, gets a fresh step id and
    /// lists the frontier of every preceding entry for `saga_name` (its step
    /// id plus any branches merged into it) as its predecessors. Entries for
    /// other sagas are carried over.
    ///
    /// Fails with [`SagaError::UnknownSaga`] when no preceding context has an
    /// entry for `saga_name`; use [`StepBuilder::launch_nested`] to start a
    /// saga inside an existing context.
    #[tracing::instrument(skip(self), fields(contexts = self.contexts.len()))]
    pub fn perform_step(&self, saga_name: &str, step_name: &str) -> Result<SagaContext> {
        let mut merged = merge_all(&self.contexts)?;

        let Some(base) = merged.get(saga_name) else {
            return Err(SagaError::UnknownSaga(saga_name.to_string()));
        };

        let prev_steps_ids: BTreeSet<SagaStepId> = self
            .contexts
            .iter()
            .filter_map(|c| c.get(saga_name))
            .flat_map(|m| m.frontier())
            .collect();

        let next = StepMetadata {
            saga_name: saga_name.to_string(),
            step_name: step_name.to_string(),
            saga_step_id: SagaStepId::new(),
            saga_instance_id: base.saga_instance_id,
            prev_steps_ids,
            joined_steps_ids: BTreeSet::new(),
        };
        tracing::debug!(
            saga_instance_id = %next.saga_instance_id,
            saga_step_id = %next.saga_step_id,
            prev = next.prev_steps_ids.len(),
            "step context built"
        );
        merged.put(next);

        Ok(merged)
    }

    /// Starts `saga_name` as a nested saga inside the preceding context(s).
    ///
    /// The existing entries are carried over unchanged and the new saga gets
    /// its own instance id. Fails with [`SagaError::SagaAlreadyPresent`] if
    /// the name is already taken.
    pub fn launch_nested(&self, saga_name: &str, step_name: &str) -> Result<SagaContext> {
        let mut merged = merge_all(&self.contexts)?;
        if merged.contains(saga_name) {
            return Err(SagaError::SagaAlreadyPresent(saga_name.to_string()));
        }
        merged.put(StepMetadata::first(saga_name, step_name));
        Ok(merged)
    }
}
