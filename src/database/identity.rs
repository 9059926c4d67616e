//! Read-mostly mirror of the `app.identities` table (§3 "Identity", §6
//! "Identity collaborator"). The identity service that owns this table is
//! external to the core; this module exists only so the
//! crate is self-contained and runnable without a second service — a real
//! deployment swaps it for a client of that service.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Model {
    pub async fn fetch_by_id<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT id, email, email_verified, created_at, last_seen_at FROM {} WHERE id = $1",
            Tables::IDENTITIES
        );

        sqlx::query_as(&q).bind(id).fetch_optional(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn fetch_by_email<'q, E>(pool: E, email: &str) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT id, email, email_verified, created_at, last_seen_at FROM {} WHERE lower(email) = lower($1)",
            Tables::IDENTITIES
        );

        sqlx::query_as(&q).bind(email).fetch_optional(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// §9 Open Questions: "treat email attachment as optional and strictly
    /// gated by the 'no other identity holds it' check". Returns `false`
    /// without writing anything if another identity already holds `email`
    /// or if `identity` already has an email recorded.
    pub async fn attach_email_if_missing<'q, E>(pool: E, identity: Uuid, email: &str) -> Result<bool>
    where
        E: 'q + Executor<'q, Database = Postgres> + Copy,
    {
        if let Some(existing) = Self::fetch_by_email(pool, email).await?
            && existing.id != identity
        {
            return Ok(false);
        }

        let q = format!(
            "UPDATE {} SET email = $2, email_verified = false
             WHERE id = $1 AND email IS NULL",
            Tables::IDENTITIES
        );

        let rows = sqlx::query(&q)
            .bind(identity)
            .bind(email)
            .execute(pool)
            .await
            .map_err(DatabaseError::Sqlx)?
            .rows_affected();

        Ok(rows == 1)
    }
}
