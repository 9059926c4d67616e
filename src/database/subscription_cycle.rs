//! Per-period grant record (§4.F). The partial unique index on
//! `(subscription_id, period_start)` is `grant_cycle`'s entire idempotency
//! guarantee — a retried cron tick or a replayed recurring-payment webhook
//! both collapse to the same row.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables, is_unique_violation};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub credits_granted: i64,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Returns `Ok(None)` (rather than an error) on a duplicate, since a
    /// duplicate cycle is the expected outcome of a retried sweep, not a
    /// fault.
    pub async fn create_if_absent<'q, E>(
        pool: E,
        subscription_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        credits_granted: i64,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, subscription_id, period_start, period_end, credits_granted, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, NOW())
             RETURNING id, subscription_id, period_start, period_end, credits_granted, created_at",
            Tables::SUBSCRIPTION_CYCLES
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(subscription_id)
            .bind(period_start)
            .bind(period_end)
            .bind(credits_granted)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(model) => Ok(Some(model)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(DatabaseError::Sqlx(e)),
        }
    }

}
