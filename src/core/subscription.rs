//! Subscription state machine (§4.F). Mirrors the PSP-facing lifecycle:
//! checkout → first payment → active → (past_due ⟷ active) → cancelled →
//! expired, with refund/chargeback suspending from any state.

use chrono::{Datelike, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::period;
use crate::core::psp::PaymentProvider;
use crate::database::ledger::LedgerEntryType;
use crate::database::mollie_customer::Model as MollieCustomer;
use crate::database::subscription::{Model as Subscription, SubscriptionStatus};
use crate::database::subscription_cycle::Model as Cycle;
use crate::database::{DatabaseError, Result};
use crate::errors::subscription::SubscriptionError;
use crate::pricing::{self, BillingCadence};

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[schema(as = SubscriptionCheckoutOutcome)]
pub struct CheckoutOutcome {
    pub subscription_id: Uuid,
    pub checkout_url: String,
}

/// §4.F "Checkout". Expires any stale pending row first so a user who
/// abandoned a checkout can restart; rejects outright if a blocking
/// subscription already exists (Invariant S1).
pub async fn start_checkout(
    pool: &PgPool,
    psp: &dyn PaymentProvider,
    identity: Uuid,
    plan_code: &str,
    email: Option<&str>,
    redirect_url: &str,
    webhook_url: &str,
) -> Result<CheckoutOutcome> {
    let plan = pricing::subscription_plan(plan_code).map_err(DatabaseError::Pricing)?;

    Subscription::expire_pending(pool, identity).await?;

    if Subscription::fetch_blocking_by_identity(pool, identity).await?.is_some() {
        return Err(DatabaseError::Subscription(SubscriptionError::AlreadySubscribed));
    }

    let customer_id = match MollieCustomer::fetch(pool, identity, "mollie").await? {
        Some(c) => c.customer_id,
        None => {
            let id = psp.get_or_create_customer(identity, email).await.map_err(DatabaseError::Psp)?;
            MollieCustomer::upsert(pool, identity, "mollie", &id).await?;
            id
        }
    };

    let amount_cents = plan.credits_per_month * 10;
    let metadata = serde_json::json!({ "identity": identity, "plan_code": plan_code, "type": "subscription_first" });

    let checkout = psp
        .create_first_sequence_payment(&customer_id, amount_cents, redirect_url, webhook_url, metadata)
        .await
        .map_err(DatabaseError::Psp)?;

    let subscription =
        Subscription::create_pending(pool, identity, plan_code, "mollie", &checkout.payment_id).await?;

    Ok(CheckoutOutcome { subscription_id: subscription.id, checkout_url: checkout.checkout_url })
}

/// §4.F "First payment paid". Creates the recurring PSP subscription,
/// activates the local row, then grants the first monthly cycle
/// immediately.
pub async fn activate_first_payment(
    pool: &PgPool,
    psp: &dyn PaymentProvider,
    first_payment_id: &str,
    mandate_id: &str,
    customer_id: &str,
    webhook_url: &str,
) -> Result<Uuid> {
    let subscription = Subscription::fetch_by_first_payment_id(pool, first_payment_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(Uuid::nil())))?;

    if subscription.status != SubscriptionStatus::PendingPayment {
        return Ok(subscription.id);
    }

    let plan = pricing::subscription_plan(&subscription.plan_code).map_err(DatabaseError::Pricing)?;

    let interval = match plan.cadence {
        BillingCadence::Monthly => "1 month",
        BillingCadence::Yearly => "1 month",
    };

    let metadata = serde_json::json!({ "identity": subscription.identity, "plan_code": subscription.plan_code });

    let provider_subscription_id = psp
        .create_subscription(customer_id, mandate_id, interval, plan.credits_per_month * 10, webhook_url, metadata)
        .await
        .map_err(DatabaseError::Psp)?;

    let now = Utc::now();
    let billing_day = now.day();
    let (period_end, credits_remaining_months, prepaid_until) = match plan.cadence {
        BillingCadence::Monthly => (now + Duration::days(30), None, None),
        BillingCadence::Yearly => {
            let end = now + Duration::days(365);
            (end, Some(12), Some(end))
        }
    };
    let next_credit_date = period::next_monthly_date(now, billing_day);

    let activated = Subscription::activate(
        pool,
        subscription.id,
        &provider_subscription_id,
        customer_id,
        mandate_id,
        now,
        period_end,
        billing_day as i16,
        next_credit_date,
        credits_remaining_months,
        prepaid_until,
    )
    .await?;

    grant_cycle(pool, activated.id, now, next_credit_date, Some(first_payment_id)).await?;

    Ok(activated.id)
}

/// §4.F `grant_cycle`. Double-guarded idempotency: the cycle table's
/// `(subscription_id, period_start)` unique index, and the ledger's
/// `(ref_type, ref_id)` uniqueness on `subscription_cycle` — either alone
/// suffices, both let reconciliation repair one half independently (§10.3).
pub async fn grant_cycle(
    pool: &PgPool,
    subscription_id: Uuid,
    period_start: chrono::DateTime<Utc>,
    period_end: chrono::DateTime<Utc>,
    payment_id: Option<&str>,
) -> Result<bool> {
    let subscription = Subscription::fetch_by_id(pool, subscription_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(subscription_id)))?;

    let plan = pricing::subscription_plan(&subscription.plan_code).map_err(DatabaseError::Pricing)?;

    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let cycle = Cycle::create_if_absent(&mut *tx, subscription_id, period_start, period_end, plan.credits_per_month)
        .await?;

    let Some(cycle) = cycle else {
        tx.commit().await.map_err(DatabaseError::Sqlx)?;
        return Ok(false);
    };

    let meta = payment_id.map(|p| serde_json::json!({ "payment_id": p }));

    let ledger_result = crate::database::ledger::Model::append(
        &mut *tx,
        subscription.identity,
        LedgerEntryType::SubscriptionGrant,
        plan.credits_per_month,
        plan.class,
        "subscription_cycle",
        cycle.id,
        meta,
    )
    .await;

    match ledger_result {
        Ok(_) => {}
        Err(DatabaseError::DuplicateRef(_)) => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    let next_credit_date = period::next_monthly_date(period_start, subscription.billing_day.unwrap_or(1) as u32);
    Subscription::advance_after_grant(&mut *tx, subscription_id, next_credit_date).await?;

    crate::core::email::enqueue(
        &mut *tx,
        Some(subscription.identity),
        "subscription_credits_delivered",
        serde_json::json!({ "subscription_id": subscription_id, "credits": plan.credits_per_month }),
    )
    .await?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(true)
}

/// §4.F "Recurring payment paid". Computes the payment's cycle from the
/// subscription's `billing_day`, then delegates to `grant_cycle` — which
/// is itself idempotent, so an out-of-order or replayed webhook is safe.
pub async fn recurring_payment_paid(
    pool: &PgPool,
    provider_subscription_id: &str,
    paid_at: chrono::DateTime<Utc>,
    payment_id: &str,
) -> Result<bool> {
    let subscription = Subscription::fetch_by_provider_subscription_id(pool, provider_subscription_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(Uuid::nil())))?;

    let plan = pricing::subscription_plan(&subscription.plan_code).map_err(DatabaseError::Pricing)?;
    if plan.cadence == BillingCadence::Yearly && subscription.credits_remaining_months == Some(0) {
        Subscription::reset_yearly_allowance(pool, subscription.id).await?;
    }

    let billing_day = subscription.billing_day.unwrap_or(1) as u32;
    let (period_start, period_end) = period::containing_period(paid_at, billing_day);

    grant_cycle(pool, subscription.id, period_start, period_end, Some(payment_id)).await
}

/// §4.F "Due-credit sweep". Bounded batch; yearly subscriptions exhausted
/// at `credits_remaining_months = 0` are excluded by the fetch query
/// itself, not filtered here.
pub async fn sweep_due_credits(pool: &PgPool, batch_size: i64) -> Result<usize> {
    let due = Subscription::fetch_due(pool, Utc::now(), batch_size).await?;
    let mut granted = 0;

    for subscription in due {
        let billing_day = subscription.billing_day.unwrap_or(1) as u32;
        let period_start = subscription
            .next_credit_date
            .unwrap_or_else(Utc::now);
        let period_end = period::next_monthly_date(period_start, billing_day);

        if grant_cycle(pool, subscription.id, period_start, period_end, None).await? {
            granted += 1;
        }
    }

    Ok(granted)
}

/// §4.F "Cancel". Soft cancel; access continues until `current_period_end`.
pub async fn cancel(pool: &PgPool, subscription_id: Uuid) -> Result<()> {
    let subscription = Subscription::lock_for_update(pool, subscription_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(subscription_id)))?;

    if subscription.status != SubscriptionStatus::Active && subscription.status != SubscriptionStatus::PastDue {
        return Err(DatabaseError::Subscription(SubscriptionError::InvalidTransition(subscription_id)));
    }

    Subscription::cancel(pool, subscription_id).await?;
    Ok(())
}

/// Background sweep: `cancelled` subscriptions past `current_period_end`
/// become `expired`.
pub async fn sweep_expired_cancellations(pool: &PgPool) -> Result<usize> {
    let expired = Subscription::sweep_expired_cancellations(pool, Utc::now()).await?;
    Ok(expired.len())
}

/// §4.F "Refund/chargeback of a subscription payment": suspend with a
/// reason, independent of the current status (any state can suspend).
pub async fn suspend_for_revocation(pool: &PgPool, provider_subscription_id: &str, reason: &str) -> Result<()> {
    let subscription = Subscription::fetch_by_provider_subscription_id(pool, provider_subscription_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(Uuid::nil())))?;

    Subscription::suspend(pool, subscription.id, reason).await?;

    crate::core::email::enqueue_admin_alert(
        pool,
        "admin_subscription_suspended",
        serde_json::json!({ "subscription_id": subscription.id, "reason": reason }),
    )
    .await?;

    Ok(())
}

/// §4.F: marks a subscription `past_due` on a failed recurring payment.
pub async fn mark_past_due(pool: &PgPool, provider_subscription_id: &str) -> Result<()> {
    let subscription = Subscription::fetch_by_provider_subscription_id(pool, provider_subscription_id)
        .await?
        .ok_or_else(|| DatabaseError::Subscription(SubscriptionError::NotFound(Uuid::nil())))?;

    Subscription::mark_past_due(pool, subscription.id).await?;
    Ok(())
}
