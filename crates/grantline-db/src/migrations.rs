//! Versioned SQL migrations, applied idempotently at boot.
//!
//! Migrations are plain SQL files embedded at compile time, enumerated in
//! lexicographic filename order, and tracked in
//! `schema_migrations(filename PRIMARY KEY, applied_at)`. Each unapplied
//! file is executed and recorded in the same pass.

use sqlx::PgPool;
use tracing::info;

use grantline_core::{Error, Result};

/// Embedded migration files in lexicographic order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_opportunities.sql",
        include_str!("../migrations/0001_opportunities.sql"),
    ),
    (
        "0002_ingest_runs.sql",
        include_str!("../migrations/0002_ingest_runs.sql"),
    ),
    ("0003_users.sql", include_str!("../migrations/0003_users.sql")),
    (
        "0004_fetch_observability.sql",
        include_str!("../migrations/0004_fetch_observability.sql"),
    ),
];

/// Apply all pending migrations. Safe to call on every startup.
pub async fn apply_migrations(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .map_err(Error::Database)?;

    for (filename, sql) in MIGRATIONS {
        let already_applied: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE filename = $1)",
        )
        .bind(filename)
        .fetch_one(pool)
        .await
        .map_err(Error::Database)?;

        if already_applied {
            continue;
        }

        info!(
            subsystem = "db",
            component = "migrations",
            op = "apply",
            filename = filename,
            "Applying migration"
        );

        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .map_err(|e| Error::Database(e))?;

        sqlx::query("INSERT INTO schema_migrations (filename) VALUES ($1)")
            .bind(filename)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_lexicographically_ordered_and_unique() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn migrations_are_not_empty() {
        for (name, sql) in MIGRATIONS {
            assert!(!sql.trim().is_empty(), "{} is empty", name);
        }
    }
}
