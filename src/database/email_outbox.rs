//! Outbound email queue (§4.H). A dispatcher worker drains `pending` rows;
//! failures retry up to `max_attempts` before the row is parked as `failed`
//! and (for non-alert mail) a single admin-alert row is enqueued — guarded
//! by `is_admin_alert` so an alert about a failed alert can never recurse.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};

pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "email_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub identity: Option<Uuid>,
    /// Linked purchase row, if any — mirrored onto by the dispatcher (§4.H)
    /// so `billing.purchases.email_status` stays in sync without a join.
    pub purchase_id: Option<Uuid>,
    pub template: String,
    pub payload: Json,
    pub status: EmailStatus,
    pub attempts: i32,
    pub is_admin_alert: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, identity, purchase_id, template, payload, status, attempts, \
    is_admin_alert, last_error, created_at, sent_at";

impl Model {
    pub async fn enqueue<'q, E>(
        pool: E,
        identity: Option<Uuid>,
        purchase_id: Option<Uuid>,
        template: &str,
        payload: Json,
        is_admin_alert: bool,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, identity, purchase_id, template, payload, status, attempts, is_admin_alert, last_error, created_at, sent_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, 'pending', 0, $5, NULL, NOW(), NULL)
             RETURNING {COLUMNS}",
            Tables::EMAIL_OUTBOX
        );

        sqlx::query_as(&q)
            .bind(identity)
            .bind(purchase_id)
            .bind(template)
            .bind(payload)
            .bind(is_admin_alert)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Claims up to `limit` pending rows for delivery, locking them against
    /// a concurrently-running dispatcher instance.
    pub async fn claim_pending<'q, E>(pool: E, limit: i64) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = 'pending'
             ORDER BY created_at ASC LIMIT $1
             FOR UPDATE SKIP LOCKED",
            Tables::EMAIL_OUTBOX
        );

        sqlx::query_as(&q)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_sent<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'sent', sent_at = NOW(), attempts = attempts + 1
             WHERE id = $1
             RETURNING {COLUMNS}",
            Tables::EMAIL_OUTBOX
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Records a failed delivery attempt. Transitions to `failed` once
    /// `attempts` reaches [`MAX_ATTEMPTS`]; otherwise stays `pending` for a
    /// later retry pass.
    pub async fn record_failure<'q, E>(pool: E, id: Uuid, error: &str) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET
                attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= {MAX_ATTEMPTS} THEN 'failed' ELSE 'pending' END
             WHERE id = $1
             RETURNING {COLUMNS}",
            Tables::EMAIL_OUTBOX
        );

        sqlx::query_as(&q)
            .bind(id)
            .bind(error)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}
