//! Read/insert access to `app.history_items` (§4.I check 4 "missing
//! history rows"). Ownership of the row's content is the generation
//! subsystem's; the core only needs to detect absence and insert the
//! backfill row reconciliation produces.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub job_id: Uuid,
    pub asset_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub async fn exists_for_job<'q, E>(pool: E, job_id: Uuid) -> Result<bool>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE job_id = $1)", Tables::HISTORY_ITEMS);

        sqlx::query_scalar(&q).bind(job_id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Reconciliation repair: backfill a missing history row for a
    /// terminal-succeeded job with an asset.
    pub async fn backfill<'q, E>(pool: E, job_id: Uuid, asset_id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, job_id, asset_id, created_at)
             VALUES (gen_random_uuid(), $1, $2, NOW())
             ON CONFLICT (job_id) DO UPDATE SET job_id = EXCLUDED.job_id
             RETURNING id, job_id, asset_id, created_at",
            Tables::HISTORY_ITEMS
        );

        sqlx::query_as(&q).bind(job_id).bind(asset_id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }
}
