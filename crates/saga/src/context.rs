//! Named saga contexts and their merge algebra.
//!
//! A [`SagaContext`] maps saga names to the [`StepMetadata`] of the step an
//! event belongs to. One event may take part in several sagas at once (for
//! example an inner saga running inside an outer one), so the context keeps
//! one entry per saga name.

use std::collections::{BTreeMap, BTreeSet};

use common::{SagaInstanceId, SagaStepId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Identifies one step of one saga instance and its immediate predecessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub saga_name: String,
    pub step_name: String,
    pub saga_step_id: SagaStepId,
    pub saga_instance_id: SagaInstanceId,
    /// Empty only for the first step of a saga.
    #[serde(default)]
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    /// Steps of other branches merged into this entry. The step built from
    /// this entry follows them as well as `saga_step_id`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub joined_steps_ids: BTreeSet<SagaStepId>,
}

impl StepMetadata {
    /// Metadata for the first step of a brand-new saga instance.
    pub fn first(saga_name: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            saga_name: saga_name.into(),
            step_name: step_name.into(),
            saga_step_id: SagaStepId::new(),
            saga_instance_id: SagaInstanceId::new(),
            prev_steps_ids: BTreeSet::new(),
            joined_steps_ids: BTreeSet::new(),
        }
    }

    /// True if this step has no predecessors.
    pub fn is_first_step(&self) -> bool {
        self.prev_steps_ids.is_empty()
    }

    /// Every step a step caused by this entry directly follows.
    pub fn frontier(&self) -> impl Iterator<Item = SagaStepId> + '_ {
        std::iter::once(self.saga_step_id).chain(self.joined_steps_ids.iter().copied())
    }

    /// Merges an entry for the same saga into this one.
    ///
    /// `self` keeps its step identity; `other` contributes its predecessors
    /// and its own frontier.
    fn absorb(&mut self, other: &StepMetadata) -> Result<()> {
        if self.saga_instance_id != other.saga_instance_id {
            return Err(SagaError::InstanceMismatch {
                saga_name: self.saga_name.clone(),
                expected: self.saga_instance_id,
                found: other.saga_instance_id,
            });
        }
        self.prev_steps_ids
            .extend(other.prev_steps_ids.iter().copied());
        self.joined_steps_ids.extend(other.frontier());
        self.joined_steps_ids.remove(&self.saga_step_id);
        Ok(())
    }
}

/// Saga name to step metadata, for every saga an event participates in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaContext {
    sagas: BTreeMap<String, StepMetadata>,
}

impl SagaContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context holding a single entry.
    pub fn single(metadata: StepMetadata) -> Self {
        let mut sagas = BTreeMap::new();
        sagas.insert(metadata.saga_name.clone(), metadata);
        Self { sagas }
    }

    /// Returns the entry for `saga_name`, if present.
    pub fn get(&self, saga_name: &str) -> Option<&StepMetadata> {
        self.sagas.get(saga_name)
    }

    /// Returns true if the context carries `saga_name`.
    pub fn contains(&self, saga_name: &str) -> bool {
        self.sagas.contains_key(saga_name)
    }

    /// Iterates over entries ordered by saga name.
    pub fn iter(&self) -> impl Iterator<Item = &StepMetadata> {
        self.sagas.values()
    }

    /// Saga names carried by this context.
    pub fn saga_names(&self) -> impl Iterator<Item = &str> {
        self.sagas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sagas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sagas.is_empty()
    }

    /// Replaces the entry for the metadata's saga name.
    pub(crate) fn put(&mut self, metadata: StepMetadata) {
        self.sagas.insert(metadata.saga_name.clone(), metadata);
    }

    /// Merges two contexts into a new one.
    ///
    /// Keys present on one side only are copied. For a key present on both
    /// sides the instance ids must agree; the result keeps the left entry's
    /// step id and name and the union of both predecessor sets, and records
    /// the right entry's step id in `joined_steps_ids` so a step continuing
    /// from the merged context follows both branches.
    pub fn merge(&self, other: &SagaContext) -> Result<SagaContext> {
        let mut merged = self.clone();
        for (name, right) in &other.sagas {
            match merged.sagas.get_mut(name) {
                Some(left) => left.absorb(right)?,
                None => {
                    merged.sagas.insert(name.clone(), right.clone());
                }
            }
        }
        Ok(merged)
    }
}

impl FromIterator<StepMetadata> for SagaContext {
    fn from_iter<I: IntoIterator<Item = StepMetadata>>(iter: I) -> Self {
        let mut context = SagaContext::new();
        for metadata in iter {
            context.put(metadata);
        }
        context
    }
}

/// Left-to-right merge of any number of contexts.
///
/// An empty input yields an empty context.
pub fn merge_all<'a, I>(contexts: I) -> Result<SagaContext>
where
    I: IntoIterator<Item = &'a SagaContext>,
{
    contexts
        .into_iter()
        .try_fold(SagaContext::new(), |acc, next| acc.merge(next))
}
