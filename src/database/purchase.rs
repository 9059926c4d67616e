//! One-time purchase records (§3 "Purchase", §4.E). Ingested from PSP
//! webhooks; `(provider, payment_id)` carries a unique index so a
//! redelivered webhook is a no-op at the database layer, not just the
//! application layer.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::email_outbox::EmailStatus;
use super::{DatabaseError, Result, Tables, is_unique_violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "purchase_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Refunded,
    ChargedBack,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub identity: Uuid,
    pub plan_code: String,
    pub provider: String,
    pub payment_id: String,
    pub status: PurchaseStatus,
    pub amount_cents: i64,
    pub currency: String,
    /// Mirror of the linked email outbox row's delivery status (§4.H), kept
    /// in sync by [`Self::set_email_status`] whenever the dispatcher settles
    /// that row — `NULL` means no email has ever been enqueued for this
    /// purchase.
    pub email_status: Option<EmailStatus>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, identity, plan_code, provider, payment_id, status, amount_cents, \
    currency, email_status, created_at, paid_at, refunded_at";

impl Model {
    /// Opens a pending purchase at checkout time, before the PSP has
    /// confirmed anything.
    pub async fn create_pending<'q, E>(
        pool: E,
        identity: Uuid,
        plan_code: &str,
        provider: &str,
        payment_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, identity, plan_code, provider, payment_id, status, amount_cents, currency, email_status, created_at, paid_at, refunded_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, 'pending', $5, $6, NULL, NOW(), NULL, NULL)
             RETURNING {COLUMNS}",
            Tables::PURCHASES
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(identity)
            .bind(plan_code)
            .bind(provider)
            .bind(payment_id)
            .bind(amount_cents)
            .bind(currency)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => Err(DatabaseError::DuplicateRef(format!(
                "{provider}:{payment_id}"
            ))),
            Err(e) => Err(DatabaseError::Sqlx(e)),
        }
    }

    pub async fn fetch_by_provider_ref<'q, E>(
        pool: E,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT {COLUMNS} FROM {} WHERE provider = $1 AND payment_id = $2", Tables::PURCHASES);

        sqlx::query_as(&q)
            .bind(provider)
            .bind(payment_id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn lock_for_update<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT {COLUMNS} FROM {} WHERE id = $1 FOR UPDATE", Tables::PURCHASES);

        sqlx::query_as(&q)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_completed<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'completed', paid_at = NOW() WHERE id = $1 RETURNING {COLUMNS}",
            Tables::PURCHASES
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_refunded<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'refunded', refunded_at = NOW() WHERE id = $1 RETURNING {COLUMNS}",
            Tables::PURCHASES
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_charged_back<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'charged_back' WHERE id = $1 RETURNING {COLUMNS}",
            Tables::PURCHASES
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// §4.H "Linked purchase rows receive a mirrored email_status column
    /// update": called by the outbox dispatcher whenever it settles a row
    /// that names this purchase, so a cheap read of the purchase row alone
    /// tells a caller whether its receipt went out.
    pub async fn set_email_status<'q, E>(pool: E, id: Uuid, status: EmailStatus) -> Result<()>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("UPDATE {} SET email_status = $2 WHERE id = $1", Tables::PURCHASES);

        sqlx::query(&q).bind(id).bind(status).execute(pool).await.map_err(DatabaseError::Sqlx)?;

        Ok(())
    }

    /// Reconciliation check 1 ("purchases missing ledger"): completed
    /// purchases with no matching `purchase_credit` ledger entry — the case
    /// where `record_purchase`'s purchase-mark and ledger-append split
    /// across a crash between the two statements. Bounded so a large
    /// backlog doesn't block one reconciliation tick.
    pub async fn fetch_completed_missing_ledger<'q, E>(pool: E, limit: i64) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let cols = COLUMNS
            .split(", ")
            .map(|c| format!("p.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let q = format!(
            "SELECT {cols}
             FROM {} p
             LEFT JOIN {} l ON l.ref_type = 'purchase' AND l.ref_id = p.id AND l.entry_type = 'purchase_credit'
             WHERE p.status = 'completed' AND l.id IS NULL
             ORDER BY p.created_at ASC LIMIT $1",
            Tables::PURCHASES,
            Tables::LEDGER_ENTRIES
        );

        sqlx::query_as(&q).bind(limit).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Purchases completed in `[since, until)`, used by the PSP-comparison
    /// pass of reconciliation to diff against the provider's own payment list.
    pub async fn fetch_paid_between<'q, E>(
        pool: E,
        provider: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {COLUMNS} FROM {} WHERE provider = $1 AND status = 'completed' AND paid_at >= $2 AND paid_at < $3",
            Tables::PURCHASES
        );

        sqlx::query_as(&q)
            .bind(provider)
            .bind(since)
            .bind(until)
            .fetch_all(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}
