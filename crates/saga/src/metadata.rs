//! Saga metadata as carried on events.
//!
//! Events participate in sagas either through a named [`SagaContext`] or
//! through the reduced correlation/causation triple. The two shapes never
//! mix on one event.

use common::{SagaInstanceId, SagaStepId};
use event_store::EventEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::SagaContext;
use crate::error::Result;

/// Envelope metadata key (and payload field name) saga metadata is stored under.
pub const SAGA_METADATA_KEY: &str = "saga";

/// Unnamed, single-predecessor saga context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducedContext {
    /// Shared by every step of one transaction.
    pub correlation_id: SagaInstanceId,
    /// The step this event belongs to.
    pub current_event_id: SagaStepId,
    /// The preceding step, absent on the first one.
    #[serde(default)]
    pub causation_id: Option<SagaStepId>,
}

impl ReducedContext {
    /// Starts a new reduced saga.
    pub fn launch() -> Self {
        Self {
            correlation_id: SagaInstanceId::new(),
            current_event_id: SagaStepId::new(),
            causation_id: None,
        }
    }

    /// The context for the step caused by this one.
    pub fn next(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            current_event_id: SagaStepId::new(),
            causation_id: Some(self.current_event_id),
        }
    }
}

/// Saga metadata attached to a business event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaMetadata {
    Named(SagaContext),
    Reduced(ReducedContext),
}

impl SagaMetadata {
    /// Returns the named context, if this is one.
    pub fn as_named(&self) -> Option<&SagaContext> {
        match self {
            SagaMetadata::Named(context) => Some(context),
            SagaMetadata::Reduced(_) => None,
        }
    }

    /// Returns the reduced context, if this is one.
    pub fn as_reduced(&self) -> Option<&ReducedContext> {
        match self {
            SagaMetadata::Reduced(context) => Some(context),
            SagaMetadata::Named(_) => None,
        }
    }

    /// Serializes the metadata for embedding into an envelope.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes metadata previously produced by [`SagaMetadata::to_value`].
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl From<SagaContext> for SagaMetadata {
    fn from(context: SagaContext) -> Self {
        SagaMetadata::Named(context)
    }
}

impl From<ReducedContext> for SagaMetadata {
    fn from(context: ReducedContext) -> Self {
        SagaMetadata::Reduced(context)
    }
}

/// Reads the saga metadata attached to an event, if any.
///
/// Looks at the envelope metadata first, then at a `saga` field of the
/// payload, either at the top level or inside `data` for events serialized as
/// `{"type": .., "data": ..}`. A present but undecodable value is an error;
/// `null` counts as absent.
pub fn extract_metadata(envelope: &EventEnvelope) -> Result<Option<SagaMetadata>> {
    let candidate = envelope
        .metadata_value(SAGA_METADATA_KEY)
        .or_else(|| envelope.payload.get(SAGA_METADATA_KEY))
        .or_else(|| {
            envelope
                .payload
                .get("data")
                .and_then(|data| data.get(SAGA_METADATA_KEY))
        });

    match candidate {
        None | Some(Value::Null) => Ok(None),
        Some(value) => SagaMetadata::from_value(value.clone()).map(Some),
    }
}

/// Attaches saga metadata to an envelope under [`SAGA_METADATA_KEY`].
pub fn attach_metadata(envelope: &mut EventEnvelope, metadata: &SagaMetadata) -> Result<()> {
    envelope
        .metadata
        .insert(SAGA_METADATA_KEY.to_string(), metadata.to_value()?);
    Ok(())
}
