//! Reservation holds for async generation jobs (§3 "Reservation", §4.D).
//! A hold never touches the ledger (Invariant R2); only `finalize` does,
//! via [`crate::core::reservation`].

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables, is_unique_violation};
use crate::pricing::CreditClass;

/// Invariant R3: exactly two absorbing terminals, `held -> finalized` and
/// `held -> released`. Expiry (§4.D `sweep_expired`) is a `release` with
/// `meta.reason = "expired"`, not a fourth status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Finalized,
    Released,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub identity: Uuid,
    pub job_id: Uuid,
    pub action_key: String,
    pub credit_class: CreditClass,
    pub amount: i64,
    pub status: ReservationStatus,
    pub meta: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, identity, job_id, action_key, credit_class, amount, status, meta,
    created_at, expires_at, captured_at, released_at";

impl Model {
    /// Inserts the hold row. The partial unique index on `(identity,
    /// job_id, action_key) WHERE status = 'held'` is defense-in-depth —
    /// ordinary callers never hit it because [`crate::core::reservation::reserve`]
    /// already serialises on the wallet row lock before inserting.
    pub async fn create<'q, E>(
        pool: E,
        identity: Uuid,
        job_id: Uuid,
        action_key: &str,
        class: CreditClass,
        amount: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, identity, job_id, action_key, credit_class, amount, status, meta,
                created_at, expires_at, captured_at, released_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, 'held', NULL, NOW(), $6, NULL, NULL)
             RETURNING {COLUMNS}",
            Tables::RESERVATIONS
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(identity)
            .bind(job_id)
            .bind(action_key)
            .bind(class)
            .bind(amount)
            .bind(expires_at)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::DuplicateRef(format!("job:{job_id}:{action_key}")))
            }
            Err(e) => Err(DatabaseError::Sqlx(e)),
        }
    }

    /// §4.D step 2's idempotent-return lookup: a `held`, non-expired
    /// reservation for `(identity, job_id, action_key)`. Per §10.2, an
    /// expired-but-unswept hold does NOT match here — a fresh reserve for
    /// the same job creates an independent second row.
    pub async fn fetch_active<'q, E>(
        pool: E,
        identity: Uuid,
        job_id: Uuid,
        action_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {COLUMNS} FROM {}
             WHERE identity = $1 AND job_id = $2 AND action_key = $3
               AND status = 'held' AND expires_at >= $4
             LIMIT 1",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .bind(job_id)
            .bind(action_key)
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn fetch_by_id<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", Tables::RESERVATIONS);

        sqlx::query_as(&q).bind(id).fetch_optional(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Locks the hold row. Finalize/release both start here so a racing
    /// sweep can't expire a hold while it's being settled (§5 "per
    /// reservation, finalize and release serialise on the reservation row
    /// lock").
    pub async fn lock_for_update<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT {COLUMNS} FROM {} WHERE id = $1 FOR UPDATE", Tables::RESERVATIONS);

        sqlx::query_as(&q).bind(id).fetch_optional(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// §4.D step 3: range-locks every `held`, non-expired reservation for
    /// `(identity, class)` so two concurrent reservers can't both observe
    /// the same `available` balance.
    pub async fn lock_active_for_class<'q, E>(
        pool: E,
        identity: Uuid,
        class: CreditClass,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {COLUMNS} FROM {}
             WHERE identity = $1 AND credit_class = $2 AND status = 'held' AND expires_at >= $3
             FOR UPDATE",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .bind(class)
            .bind(now)
            .fetch_all(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_finalized<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'finalized', captured_at = NOW() WHERE id = $1 RETURNING {COLUMNS}",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_released<'q, E>(pool: E, id: Uuid, reason: &str) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'released', released_at = NOW(),
                meta = COALESCE(meta, '{{}}'::jsonb) || jsonb_build_object('reason', $2::text)
             WHERE id = $1 RETURNING {COLUMNS}",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q).bind(id).bind(reason).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Bulk-releases overdue holds with `reason=expired`, returning the
    /// affected rows so the caller can log/emit metrics per row. Driven by
    /// the periodic sweep in `core::reservation::sweep_expired`. Safe to
    /// call concurrently: each row transitions at most once (`WHERE status
    /// = 'held'` excludes already-swept rows).
    pub async fn sweep_expired<'q, E>(pool: E, now: DateTime<Utc>) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'released', released_at = NOW(),
                meta = COALESCE(meta, '{{}}'::jsonb) || jsonb_build_object('reason', 'expired')
             WHERE status = 'held' AND expires_at < $1
             RETURNING {COLUMNS}",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q).bind(now).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Sum of `amount` across held, non-expired reservations for
    /// `(identity, class)` — the "reserved" term in `available = balance -
    /// reserved` (§4.B). Unlocked; used by read paths, not mutators.
    pub async fn reserved_total<'q, E>(
        pool: E,
        identity: Uuid,
        class: CreditClass,
        now: DateTime<Utc>,
    ) -> Result<i64>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT COALESCE(SUM(amount), 0) FROM {}
             WHERE identity = $1 AND credit_class = $2 AND status = 'held' AND expires_at >= $3",
            Tables::RESERVATIONS
        );

        sqlx::query_scalar(&q)
            .bind(identity)
            .bind(class)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Reconciliation check 3 ("stale holds"): `held` reservations older
    /// than `threshold`, for the caller to cross-reference against job
    /// status.
    pub async fn fetch_stale_held<'q, E>(
        pool: E,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {COLUMNS} FROM {}
             WHERE status = 'held' AND created_at < $1
             ORDER BY created_at ASC LIMIT $2",
            Tables::RESERVATIONS
        );

        sqlx::query_as(&q).bind(older_than).bind(limit).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }
}
