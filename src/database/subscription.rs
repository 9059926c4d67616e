//! Subscription state machine row (§3 "Subscription", §4.F).

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables, is_unique_violation};
use crate::errors::subscription::SubscriptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    PendingPayment,
    Active,
    PastDue,
    Cancelled,
    Suspended,
    Expired,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub identity: Uuid,
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub provider: String,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub mandate_id: Option<String>,
    pub first_payment_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub billing_day: Option<i16>,
    pub next_credit_date: Option<DateTime<Utc>>,
    pub credits_remaining_months: Option<i32>,
    pub prepaid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspend_reason: Option<String>,
}

impl Model {
    /// Opens a subscription in `pending_payment` with the first-payment id
    /// already recorded. Step 4 of checkout (§4.F).
    pub async fn create_pending<'q, E>(
        pool: E,
        identity: Uuid,
        plan_code: &str,
        provider: &str,
        first_payment_id: &str,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, identity, plan_code, status, provider, provider_subscription_id,
                provider_customer_id, mandate_id, first_payment_id, current_period_start,
                current_period_end, billing_day, next_credit_date, credits_remaining_months,
                prepaid_until, created_at, cancelled_at, suspended_at, suspend_reason)
             VALUES (gen_random_uuid(), $1, $2, 'pending_payment', $3, NULL, NULL, NULL, $4,
                NULL, NULL, NULL, NULL, NULL, NULL, NOW(), NULL, NULL, NULL)
             RETURNING id, identity, plan_code, status, provider, provider_subscription_id,
                provider_customer_id, mandate_id, first_payment_id, current_period_start,
                current_period_end, billing_day, next_credit_date, credits_remaining_months,
                prepaid_until, created_at, cancelled_at, suspended_at, suspend_reason",
            Tables::SUBSCRIPTIONS
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(identity)
            .bind(plan_code)
            .bind(provider)
            .bind(first_payment_id)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                Err(DatabaseError::Subscription(SubscriptionError::AlreadySubscribed))
            }
            Err(e) => Err(DatabaseError::Sqlx(e)),
        }
    }

    const COLUMNS: &'static str = "id, identity, plan_code, status, provider, provider_subscription_id,
        provider_customer_id, mandate_id, first_payment_id, current_period_start,
        current_period_end, billing_day, next_credit_date, credits_remaining_months,
        prepaid_until, created_at, cancelled_at, suspended_at, suspend_reason";

    pub async fn fetch_by_id<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!("SELECT {} FROM {} WHERE id = $1", Self::COLUMNS, Tables::SUBSCRIPTIONS);

        sqlx::query_as(&q)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn fetch_by_provider_subscription_id<'q, E>(
        pool: E,
        provider_subscription_id: &str,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {} WHERE provider_subscription_id = $1",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q)
            .bind(provider_subscription_id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn fetch_by_first_payment_id<'q, E>(
        pool: E,
        first_payment_id: &str,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {} WHERE first_payment_id = $1",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q)
            .bind(first_payment_id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Invariant S1: at most one subscription per identity in
    /// `{active, pending_payment, past_due}`.
    pub async fn fetch_blocking_by_identity<'q, E>(pool: E, identity: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {} WHERE identity = $1 AND status IN ('active', 'pending_payment', 'past_due')
             ORDER BY created_at DESC LIMIT 1",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Most recent subscription row for an identity regardless of status,
    /// for the `GET /api/billing/subscriptions/status` view — unlike
    /// [`Self::fetch_blocking_by_identity`], this also surfaces a
    /// `cancelled`/`suspended`/`expired` row when no blocking one exists.
    pub async fn fetch_latest_by_identity<'q, E>(pool: E, identity: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {} WHERE identity = $1 ORDER BY created_at DESC LIMIT 1",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn lock_for_update<'q, E>(pool: E, id: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {} WHERE id = $1 FOR UPDATE",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Expires a stale `pending_payment` row so the identity can restart
    /// checkout (§4.F step 1).
    pub async fn expire_pending<'q, E>(pool: E, identity: Uuid) -> Result<()>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'expired' WHERE identity = $1 AND status = 'pending_payment'",
            Tables::SUBSCRIPTIONS
        );

        sqlx::query(&q).bind(identity).execute(pool).await.map_err(DatabaseError::Sqlx)?;

        Ok(())
    }

    /// First payment confirmed: activates the subscription per §4.F step 3.
    #[allow(clippy::too_many_arguments)]
    pub async fn activate<'q, E>(
        pool: E,
        id: Uuid,
        provider_subscription_id: &str,
        provider_customer_id: &str,
        mandate_id: &str,
        current_period_start: DateTime<Utc>,
        current_period_end: DateTime<Utc>,
        billing_day: i16,
        next_credit_date: DateTime<Utc>,
        credits_remaining_months: Option<i32>,
        prepaid_until: Option<DateTime<Utc>>,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'active', provider_subscription_id = $2, provider_customer_id = $3,
                mandate_id = $4, current_period_start = $5, current_period_end = $6, billing_day = $7,
                next_credit_date = $8, credits_remaining_months = $9, prepaid_until = $10
             WHERE id = $1
             RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q)
            .bind(id)
            .bind(provider_subscription_id)
            .bind(provider_customer_id)
            .bind(mandate_id)
            .bind(current_period_start)
            .bind(current_period_end)
            .bind(billing_day)
            .bind(next_credit_date)
            .bind(credits_remaining_months)
            .bind(prepaid_until)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// `grant_cycle` step 3: advances `next_credit_date` and, for yearly
    /// plans, decrements `credits_remaining_months` with a floor of zero.
    /// For non-yearly subscriptions `credits_remaining_months` stays `NULL`
    /// — `GREATEST` ignores a `NULL` argument and would silently coerce it
    /// to `0`, so the `NULL` case is short-circuited explicitly instead.
    pub async fn advance_after_grant<'q, E>(
        pool: E,
        id: Uuid,
        next_credit_date: DateTime<Utc>,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET next_credit_date = $2,
                credits_remaining_months = CASE
                    WHEN credits_remaining_months IS NULL THEN NULL
                    ELSE GREATEST(0, credits_remaining_months - 1)
                END
             WHERE id = $1
             RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q)
            .bind(id)
            .bind(next_credit_date)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Yearly renewal: a recurring PSP payment arrived after
    /// `credits_remaining_months` reached zero, so reset it to 12.
    pub async fn reset_yearly_allowance<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET credits_remaining_months = 12 WHERE id = $1 RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn mark_past_due<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'past_due' WHERE id = $1 RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Soft cancel (§4.F "Cancel"): access continues until
    /// `current_period_end`; the expiry sweep finishes the transition later.
    pub async fn cancel<'q, E>(pool: E, id: Uuid) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'cancelled', cancelled_at = NOW() WHERE id = $1 RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q).bind(id).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    pub async fn suspend<'q, E>(pool: E, id: Uuid, reason: &str) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'suspended', suspended_at = NOW(), suspend_reason = $2
             WHERE id = $1 RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q).bind(id).bind(reason).fetch_one(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Cancelled subscriptions whose `current_period_end` has passed,
    /// transitioned to `expired` by the background sweep (§4.F "Cancel").
    pub async fn sweep_expired_cancellations<'q, E>(pool: E, now: DateTime<Utc>) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET status = 'expired'
             WHERE status = 'cancelled' AND current_period_end <= $1
             RETURNING {}",
            Tables::SUBSCRIPTIONS,
            Self::COLUMNS
        );

        sqlx::query_as(&q).bind(now).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Due-credit sweep source query: active, non-suspended subscriptions
    /// whose `next_credit_date` has come due, excluding yearly plans whose
    /// `credits_remaining_months` is exhausted.
    pub async fn fetch_due<'q, E>(pool: E, now: DateTime<Utc>, batch_size: i64) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT {} FROM {}
             WHERE status = 'active' AND next_credit_date <= $1
               AND (credits_remaining_months IS NULL OR credits_remaining_months > 0)
             ORDER BY next_credit_date ASC
             LIMIT $2",
            Self::COLUMNS,
            Tables::SUBSCRIPTIONS
        );

        sqlx::query_as(&q).bind(now).bind(batch_size).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }
}
