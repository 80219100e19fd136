use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, LogPosition, Result, Version,
    checkpoint::CheckpointStore,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
    subscription::{EventBus, EventFilter, EventPublisher, Subscription},
};

/// Advisory lock key serializing appends so `sequence` order equals commit order.
const APPEND_LOCK_KEY: i64 = 0x5a6a_0001;

/// Rows fetched per round trip when streaming the log.
pub const DEFAULT_STREAM_PAGE_SIZE: i64 = 500;

const SELECT_FROM_OFFSET: &str = r#"
    SELECT sequence, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata
    FROM events
    ORDER BY sequence ASC
    OFFSET $1
    LIMIT $2
"#;

const SELECT_AFTER_SEQUENCE: &str = r#"
    SELECT sequence, id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata
    FROM events
    WHERE sequence > $1
    ORDER BY sequence ASC
    LIMIT $2
"#;

/// Where the next page of a log stream starts.
enum PageCursor {
    /// First page: skip this many events.
    Offset(i64),
    /// Later pages: events after this `sequence` value.
    After(i64),
    Exhausted,
}

/// PostgreSQL-backed event store implementation.
///
/// Subscribers are notified in-process after commit. Consumers in other
/// processes poll [`EventStore::stream_all_events_from`] instead.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    publisher: EventPublisher,
    page_size: i64,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            publisher: EventPublisher::default(),
            page_size: DEFAULT_STREAM_PAGE_SIZE,
        }
    }

    /// Overrides how many rows each page of a log stream fetches.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations (events, checkpoints and projection tables).
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        if let Some(expected) = options.expected_version {
            let current_version: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                    .bind(aggregate_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Version::new(current_version.unwrap_or(0));

            if actual != expected {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::initial();
        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_aggregate_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: options.expected_version.unwrap_or(Version::initial()),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        tx.commit().await?;
        tracing::debug!(%aggregate_id, %last_version, "events committed");

        self.publisher.publish(&events);
        metrics::counter!("event_store_events_appended").increment(events.len() as u64);

        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    /// Pages through the log: the first page by offset, later pages by
    /// `sequence`, so at most one page is held in memory.
    async fn stream_all_events_from(&self, from: LogPosition) -> Result<EventStream> {
        use futures_util::{StreamExt, TryStreamExt, stream};

        let offset = i64::try_from(from.as_u64()).unwrap_or(i64::MAX);
        let pool = self.pool.clone();
        let page_size = self.page_size;

        let pages = stream::try_unfold(PageCursor::Offset(offset), move |cursor| {
            let pool = pool.clone();
            async move {
                let query = match cursor {
                    PageCursor::Offset(offset) => sqlx::query(SELECT_FROM_OFFSET).bind(offset),
                    PageCursor::After(sequence) => {
                        sqlx::query(SELECT_AFTER_SEQUENCE).bind(sequence)
                    }
                    PageCursor::Exhausted => return Ok(None),
                };
                let rows = query.bind(page_size).fetch_all(&pool).await?;
                let Some(last) = rows.last() else {
                    return Ok(None);
                };

                let next = if (rows.len() as i64) < page_size {
                    PageCursor::Exhausted
                } else {
                    PageCursor::After(last.try_get("sequence")?)
                };
                let events: Vec<Result<EventEnvelope>> =
                    rows.into_iter().map(Self::row_to_event).collect();
                Ok::<_, EventStoreError>(Some((stream::iter(events), next)))
            }
        });

        Ok(pages.try_flatten().boxed())
    }
}

impl EventBus for PostgresEventStore {
    fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.publisher.subscribe(filter)
    }
}

/// PostgreSQL-backed checkpoint store (`checkpoints` table).
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Creates a checkpoint store on an already-migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<LogPosition>> {
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM checkpoints WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(position.map(|p| LogPosition::new(u64::try_from(p).unwrap_or(0))))
    }

    async fn save(&self, name: &str, position: LogPosition) -> Result<()> {
        let position = i64::try_from(position.as_u64()).map_err(|_| {
            EventStoreError::InvalidAppend(format!("checkpoint {position} out of range"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (name, position, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE SET
                position = EXCLUDED.position,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(name)
        .bind(position)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
