//! Ingest-run audit repository.

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use grantline_core::{Error, IngestionStats, Result, RunStatus};

/// PostgreSQL repository for ingest-run audit rows.
pub struct PgIngestRunRepository {
    pool: PgPool,
}

impl PgIngestRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a `running` row for a strategy execution, returning its id.
    pub async fn start(&self, source_id: &str) -> Result<Uuid> {
        let row = sqlx::query(
            "INSERT INTO ingest_runs (source_id, status) VALUES ($1, 'running') RETURNING run_id",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.try_get("run_id")?)
    }

    /// Finalize a run with its stats and detail payload.
    pub async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: IngestionStats,
        details: JsonValue,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingest_runs
            SET status = $1,
                items_found = $2,
                items_saved = $3,
                errors = $4,
                completed_at = NOW(),
                details = $5
            WHERE run_id = $6
            "#,
        )
        .bind(status.as_str())
        .bind(stats.total_found)
        .bind(stats.total_saved)
        .bind(stats.errors)
        .bind(details)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }
}
