//! Users and saved-opportunity bookmarks.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use grantline_core::{Error, Opportunity, Result, User};

use crate::opportunities::PgOpportunityRepository;

/// PostgreSQL repository for accounts and bookmarks.
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(exists)
    }

    pub async fn insert(&self, email: &str, password_hash: &str) -> Result<User> {
        let row = sqlx::query(
            "INSERT INTO users (email, password_hash) VALUES ($1, $2) RETURNING id, email, created_at",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(User {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: String::new(),
            created_at: row.try_get("created_at")?,
        })
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(|r| {
            Ok(User {
                id: r.try_get("id")?,
                email: r.try_get("email")?,
                password_hash: r.try_get("password_hash")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    pub async fn save_opportunity(&self, user_id: Uuid, opportunity_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO saved_opportunities (user_id, opportunity_id) VALUES ($1, $2)
             ON CONFLICT (user_id, opportunity_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(opportunity_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    pub async fn unsave_opportunity(&self, user_id: Uuid, opportunity_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM saved_opportunities WHERE user_id = $1 AND opportunity_id = $2")
            .bind(user_id)
            .bind(opportunity_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// The user's saved opportunities, most recently saved first.
    pub async fn saved_opportunities(&self, user_id: Uuid) -> Result<Vec<Opportunity>> {
        let ids: Vec<Uuid> = sqlx::query(
            "SELECT opportunity_id FROM saved_opportunities WHERE user_id = $1 ORDER BY saved_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .filter_map(|r| r.try_get("opportunity_id").ok())
        .collect();

        let repo = PgOpportunityRepository::new(self.pool.clone());
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(opp) = repo.get(id).await {
                out.push(opp);
            }
        }
        Ok(out)
    }
}
