//! Read-mostly mirror of `app.jobs` (§3 "Job and asset rows are owned by
//! the generation subsystem; the core references them by id and reads
//! status only", §6 "Job/asset collaborator"). The core writes exactly two
//! things to this table: the placeholder row `reserve` inserts to satisfy
//! the reservation's FK (§4.D step 5), and the `reservation_id` back-link
//! (§4.D step 7) — everything else is owned and written by the generation
//! subsystem.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub status: JobStatus,
    pub asset_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// §4.D step 5: idempotent placeholder insert, `ON CONFLICT (id) DO
    /// NOTHING` — the reservation manager doesn't own this row's lifecycle,
    /// it only needs it to exist so the reservation's FK is satisfiable.
    pub async fn ensure_placeholder<'q, E>(pool: E, job_id: Uuid) -> Result<()>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, status, asset_id, reservation_id, created_at)
             VALUES ($1, 'queued', NULL, NULL, NOW())
             ON CONFLICT (id) DO NOTHING",
            Tables::JOBS
        );

        sqlx::query(&q).bind(job_id).execute(pool).await.map_err(DatabaseError::Sqlx)?;

        Ok(())
    }

    /// §4.D step 7: links the job row back to the reservation that holds
    /// credits for it.
    pub async fn set_reservation<'q, E>(pool: E, job_id: Uuid, reservation_id: Uuid) -> Result<()>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q =
            format!("UPDATE {} SET reservation_id = $2 WHERE id = $1", Tables::JOBS);

        sqlx::query(&q).bind(job_id).bind(reservation_id).execute(pool).await.map_err(DatabaseError::Sqlx)?;

        Ok(())
    }

    pub async fn fetch_by_id<'q, E>(pool: E, job_id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT id, status, asset_id, reservation_id, created_at FROM {} WHERE id = $1",
            Tables::JOBS
        );

        sqlx::query_as(&q).bind(job_id).fetch_optional(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Reconciliation check 4 ("missing history rows"): terminal-succeeded
    /// jobs with an asset but no linked reservation and no ledger debit —
    /// reconciliation check 5 ("ready-unbilled") reads the same shape.
    pub async fn fetch_succeeded_with_asset<'q, E>(
        pool: E,
        limit: i64,
    ) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT id, status, asset_id, reservation_id, created_at FROM {}
             WHERE status = 'succeeded' AND asset_id IS NOT NULL
             ORDER BY created_at ASC LIMIT $1",
            Tables::JOBS
        );

        sqlx::query_as(&q).bind(limit).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }
}
