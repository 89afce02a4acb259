//! # grantline-db
//!
//! PostgreSQL database layer for grantline.
//!
//! This crate provides:
//! - Connection pool management
//! - Embedded SQL migrations tracked in `schema_migrations`
//! - The opportunity repository (monotonic upsert, hybrid listing, facets)
//! - Ingest-run audit rows
//! - Users and saved-opportunity bookmarks

pub mod ingest_runs;
pub mod migrations;
pub mod opportunities;
pub mod pool;
pub mod users;

pub use ingest_runs::PgIngestRunRepository;
pub use migrations::apply_migrations;
pub use opportunities::{
    Aggregation, AggregationParams, AggregationResult, EnrichmentCandidate, ListParams,
    ListResult, PgOpportunityRepository, StatusSweepRow,
};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use users::PgUserRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::PgPool,
    /// Opportunity repository.
    pub opportunities: PgOpportunityRepository,
    /// Ingest-run audit repository.
    pub ingest_runs: PgIngestRunRepository,
    /// User and bookmark repository.
    pub users: PgUserRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            opportunities: PgOpportunityRepository::new(pool.clone()),
            ingest_runs: PgIngestRunRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect and build the repository context.
    pub async fn connect(url: &str) -> grantline_core::Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> grantline_core::Result<()> {
        apply_migrations(&self.pool).await
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("100%_\\"), "100\\%\\_\\\\");
    }
}
