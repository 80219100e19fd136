pub mod checkpoint;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod subscription;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, LogPosition};
pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::{PostgresCheckpointStore, PostgresEventStore};
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
pub use subscription::{Delivery, EventBus, EventFilter, EventPublisher, Subscription};
