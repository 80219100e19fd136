//! Command handling for saga participants.
//!
//! [`CommandHandler::execute_with_metadata`] is how a participating service
//! ties its local transaction to a saga: the saga metadata is embedded,
//! unchanged, into every envelope the command produces.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
use saga::{SAGA_METADATA_KEY, SagaMetadata};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The envelopes as they were appended.
    pub envelopes: Vec<EventEnvelope>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Loads an aggregate, runs a command against it and appends the outcome.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds an aggregate from its events.
    ///
    /// An aggregate without events comes back as `A::default()`.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError> {
        let events = self.store.get_events_for_aggregate(aggregate_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        Ok(aggregate.id().is_some().then_some(aggregate))
    }

    /// Executes a command outside of any saga.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        self.execute_with_metadata(aggregate_id, None, command_fn)
            .await
    }

    /// Executes a command as a saga step.
    ///
    /// `command_fn` receives the current state and returns the events to
    /// record, or rejects the command. When `metadata` is given it is stored
    /// under the `saga` envelope metadata key of every produced event. A
    /// command producing no events appends nothing.
    #[tracing::instrument(
        skip(self, metadata, command_fn),
        fields(aggregate_type = A::aggregate_type(), saga = metadata.is_some())
    )]
    pub async fn execute_with_metadata<F>(
        &self,
        aggregate_id: AggregateId,
        metadata: Option<&SagaMetadata>,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                envelopes: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(aggregate_id, current_version, &events, metadata)?;

        let options = if current_version == Version::initial() {
            AppendOptions::expect_new()
        } else {
            AppendOptions::expect_version(current_version)
        };

        let new_version = self.store.append(envelopes.clone(), options).await?;
        metrics::counter!("domain_events_recorded_total", "aggregate_type" => A::aggregate_type())
            .increment(events.len() as u64);

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            envelopes,
            new_version,
        })
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
        metadata: Option<&SagaMetadata>,
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let saga_value = metadata.map(SagaMetadata::to_value).transpose()?;

        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            if let Some(value) = &saga_value {
                builder = builder.metadata(SAGA_METADATA_KEY, value.clone());
            }
            envelopes.push(builder.build()?);
        }

        Ok(envelopes)
    }
}
