//! The saga execution graph document.
//!
//! One [`SagaProjection`] exists per saga instance. Steps are keyed by their
//! own id and may arrive in any order, so a step's view can exist as a
//! placeholder (confirmed but not yet seen) until its launch or initiation
//! shows up. Display order is derived from `prev_steps_ids`, never from
//! arrival order.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use common::{SagaInstanceId, SagaStepId};
use serde::{Deserialize, Serialize};
use step_tracking::{StepDefaultProcessedData, StepProcessedData, StepSeenData, StepTrackingEvent};

/// One step of a saga as seen by the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStepView {
    pub step_name: Option<String>,
    pub saga_step_id: SagaStepId,
    #[serde(default)]
    pub prev_steps_ids: BTreeSet<SagaStepId>,
    /// None while the view is a placeholder.
    pub initiated_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub event_name: Option<String>,
}

impl SagaStepView {
    fn placeholder(saga_step_id: SagaStepId) -> Self {
        Self {
            step_name: None,
            saga_step_id,
            prev_steps_ids: BTreeSet::new(),
            initiated_at: None,
            processed_at: None,
            event_name: None,
        }
    }

    /// Created from a confirmation before the step itself was seen.
    pub fn is_placeholder(&self) -> bool {
        self.initiated_at.is_none()
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Execution graph of one saga instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaProjection {
    pub saga_instance_id: SagaInstanceId,
    pub saga_name: Option<String>,
    #[serde(default)]
    pub steps: Vec<SagaStepView>,
}

impl SagaProjection {
    /// Creates an empty document.
    pub fn new(saga_instance_id: SagaInstanceId) -> Self {
        Self {
            saga_instance_id,
            saga_name: None,
            steps: Vec::new(),
        }
    }

    /// Looks up a step by id.
    pub fn step(&self, saga_step_id: SagaStepId) -> Option<&SagaStepView> {
        self.steps.iter().find(|s| s.saga_step_id == saga_step_id)
    }

    fn step_entry(&mut self, saga_step_id: SagaStepId) -> &mut SagaStepView {
        let index = match self.steps.iter().position(|s| s.saga_step_id == saga_step_id) {
            Some(index) => index,
            None => {
                self.steps.push(SagaStepView::placeholder(saga_step_id));
                self.steps.len() - 1
            }
        };
        &mut self.steps[index]
    }

    /// Applies a step tracking event. Returns whether the document changed.
    ///
    /// Every transition is idempotent: replaying an event that is already
    /// reflected leaves the document untouched.
    pub fn apply(&mut self, event: &StepTrackingEvent) -> bool {
        match event {
            StepTrackingEvent::SagaStepLaunched(d) | StepTrackingEvent::SagaStepInitiated(d) => {
                self.apply_seen(d)
            }
            StepTrackingEvent::SagaStepProcessed(d) => self.apply_processed(d),
            StepTrackingEvent::SagaStepDefaultProcessed(d) => self.apply_default_processed(d),
        }
    }

    fn apply_seen(&mut self, d: &StepSeenData) -> bool {
        let mut changed = false;
        if self.saga_name.is_none() {
            self.saga_name = Some(d.saga_name.clone());
            changed = true;
        }

        let view = self.step_entry(d.saga_step_id);
        if view.is_placeholder() {
            view.step_name = Some(d.step_name.clone());
            view.prev_steps_ids = d.prev_steps_ids.clone();
            view.initiated_at = Some(d.initiated_at);
            changed = true;
        }
        changed
    }

    fn apply_processed(&mut self, d: &StepProcessedData) -> bool {
        let mut changed = false;
        if self.saga_name.is_none()
            && let Some(name) = &d.saga_name
        {
            self.saga_name = Some(name.clone());
            changed = true;
        }

        let view = self.step_entry(d.saga_step_id);
        if view.processed_at.is_none() {
            view.processed_at = Some(d.processed_at);
            view.event_name = Some(d.event_name.clone());
            changed = true;
        }
        changed
    }

    fn apply_default_processed(&mut self, d: &StepDefaultProcessedData) -> bool {
        let view = self.step_entry(d.saga_step_id);
        if !view.is_placeholder() && view.is_processed() {
            return false;
        }
        view.prev_steps_ids = d.prev_steps_ids.clone();
        view.initiated_at = Some(d.initiated_at);
        view.processed_at = Some(d.processed_at);
        view.event_name = Some(d.event_name.clone());
        true
    }

    /// Steps without predecessors.
    pub fn roots(&self) -> Vec<&SagaStepView> {
        self.steps
            .iter()
            .filter(|s| !s.is_placeholder() && s.prev_steps_ids.is_empty())
            .collect()
    }

    /// Steps no other step names as a predecessor.
    pub fn leaves(&self) -> Vec<&SagaStepView> {
        let referenced: BTreeSet<SagaStepId> = self
            .steps
            .iter()
            .flat_map(|s| s.prev_steps_ids.iter().copied())
            .collect();
        self.steps
            .iter()
            .filter(|s| !referenced.contains(&s.saga_step_id))
            .collect()
    }

    /// Steps that are placeholders or not yet processed.
    pub fn pending_steps(&self) -> Vec<&SagaStepView> {
        self.steps
            .iter()
            .filter(|s| s.is_placeholder() || !s.is_processed())
            .collect()
    }

    /// True when every step is seen and processed and no predecessor is missing.
    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty()
            && self.pending_steps().is_empty()
            && self
                .steps
                .iter()
                .flat_map(|s| s.prev_steps_ids.iter())
                .all(|id| self.step(*id).is_some())
    }

    /// Steps ordered so each one comes after its predecessors.
    ///
    /// Kahn's algorithm over `prev_steps_ids`; predecessors missing from the
    /// document are ignored. Ties are broken by `initiated_at` (placeholders
    /// last) and then by step id.
    pub fn topological_order(&self) -> Vec<&SagaStepView> {
        let index: HashMap<SagaStepId, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.saga_step_id, i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            for prev in &step.prev_steps_ids {
                if let Some(&p) = index.get(prev) {
                    in_degree[i] += 1;
                    successors[p].push(i);
                }
            }
        }

        let key = |i: usize| {
            let s = &self.steps[i];
            (s.initiated_at.is_none(), s.initiated_at, s.saga_step_id, i)
        };

        let mut ready: BTreeSet<_> = (0..self.steps.len())
            .filter(|&i| in_degree[i] == 0)
            .map(key)
            .collect();
        let mut ordered = Vec::with_capacity(self.steps.len());
        let mut emitted = vec![false; self.steps.len()];

        loop {
            while let Some(next) = ready.pop_first() {
                let i = next.3;
                emitted[i] = true;
                ordered.push(&self.steps[i]);
                for &succ in &successors[i] {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        ready.insert(key(succ));
                    }
                }
            }

            // A cycle can only come from corrupted metadata; release the
            // earliest remaining step and continue.
            match (0..self.steps.len()).filter(|&i| !emitted[i]).map(key).min() {
                Some(next) => {
                    in_degree[next.3] = 0;
                    ready.insert(next);
                }
                None => break,
            }
        }

        ordered
    }
}
