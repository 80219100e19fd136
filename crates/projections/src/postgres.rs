use async_trait::async_trait;
use common::SagaInstanceId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::document::{SagaProjection, SagaStepView};
use crate::error::{ProjectionError, Result};
use crate::store::{ProjectionCollection, ProjectionStore, Versioned};

/// PostgreSQL-backed projection store.
///
/// Expects the tables created by the workspace migrations
/// (`saga_projections` and `reduced_saga_projections`).
#[derive(Clone)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_document(row: PgRow) -> Result<Versioned<SagaProjection>> {
        let steps: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<SagaStepView> = serde_json::from_value(steps)?;
        let version: i64 = row.try_get("version")?;

        Ok(Versioned {
            value: SagaProjection {
                saga_instance_id: SagaInstanceId::from_uuid(
                    row.try_get::<Uuid, _>("saga_instance_id")?,
                ),
                saga_name: row.try_get("saga_name")?,
                steps,
            },
            version: u64::try_from(version).unwrap_or(0),
        })
    }
}

fn to_i64(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| ProjectionError::Projection(format!("version {version} out of range")))
}

#[async_trait]
impl ProjectionStore for PostgresProjectionStore {
    async fn load(
        &self,
        collection: ProjectionCollection,
        saga_instance_id: SagaInstanceId,
    ) -> Result<Option<Versioned<SagaProjection>>> {
        let query = format!(
            "SELECT saga_instance_id, saga_name, steps, version FROM {} WHERE saga_instance_id = $1",
            collection.table()
        );
        let row = sqlx::query(&query)
            .bind(saga_instance_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_document).transpose()
    }

    #[tracing::instrument(skip(self, projection), fields(saga_instance_id = %projection.saga_instance_id))]
    async fn save(
        &self,
        collection: ProjectionCollection,
        projection: &SagaProjection,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let steps = serde_json::to_value(&projection.steps)?;
        let table = collection.table();

        let (result, new_version) = match expected_version {
            None => {
                let query = format!(
                    r#"
                    INSERT INTO {table} (saga_instance_id, saga_name, steps, version)
                    VALUES ($1, $2, $3, 1)
                    ON CONFLICT (saga_instance_id) DO NOTHING
                    "#
                );
                let result = sqlx::query(&query)
                    .bind(projection.saga_instance_id.as_uuid())
                    .bind(&projection.saga_name)
                    .bind(steps)
                    .execute(&self.pool)
                    .await?;
                (result, 1)
            }
            Some(expected) => {
                let query = format!(
                    r#"
                    UPDATE {table}
                    SET saga_name = $2, steps = $3, version = $4
                    WHERE saga_instance_id = $1 AND version = $5
                    "#
                );
                let result = sqlx::query(&query)
                    .bind(projection.saga_instance_id.as_uuid())
                    .bind(&projection.saga_name)
                    .bind(steps)
                    .bind(to_i64(expected + 1)?)
                    .bind(to_i64(expected)?)
                    .execute(&self.pool)
                    .await?;
                (result, expected + 1)
            }
        };

        if result.rows_affected() == 0 {
            return Err(ProjectionError::Conflict {
                collection,
                saga_instance_id: projection.saga_instance_id,
            });
        }
        Ok(new_version)
    }

    async fn list(&self, collection: ProjectionCollection) -> Result<Vec<SagaProjection>> {
        let query = format!(
            "SELECT saga_instance_id, saga_name, steps, version FROM {} ORDER BY saga_instance_id",
            collection.table()
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| Self::row_to_document(row).map(|d| d.value))
            .collect()
    }

    async fn clear(&self, collection: ProjectionCollection) -> Result<()> {
        let query = format!("DELETE FROM {}", collection.table());
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
