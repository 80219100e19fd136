//! Durable consumer positions in an event log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// Number of events of the global log a consumer has fully handled.
///
/// Position `n` means events `0..n` are done and event `n` is the next one
/// to read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The beginning of the log.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Creates a position from a raw event count.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Advances the position by one event.
    pub fn advance(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw event count.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position({})", self.0)
    }
}

/// Persists how far each named consumer has read.
///
/// Consumers save after handling an event, so a crash between handling and
/// saving replays that event on restart (at-least-once).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the saved position for `name`, or None if it never saved one.
    async fn load(&self, name: &str) -> Result<Option<LogPosition>>;

    /// Saves the position for `name`, replacing any previous value.
    async fn save(&self, name: &str, position: LogPosition) -> Result<()>;
}

/// In-memory checkpoint store for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    positions: Arc<RwLock<HashMap<String, LogPosition>>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<LogPosition>> {
        Ok(self.positions.read().await.get(name).copied())
    }

    async fn save(&self, name: &str, position: LogPosition) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(name.to_string(), position);
        Ok(())
    }
}
