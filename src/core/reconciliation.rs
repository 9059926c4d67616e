//! The reconciliation loop (§4.I, §10.6): five local checks plus a
//! PSP-comparison pass, run at one of three granularities. Every repair
//! this module performs is idempotent and bounded — a stuck identity or a
//! PSP outage degrades one run's coverage, it never blocks the next one.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::psp::PaymentProvider;
use crate::database::history_item::Model as HistoryItem;
use crate::database::job::Model as Job;
use crate::database::ledger::LedgerEntryType;
use crate::database::purchase::Model as Purchase;
use crate::database::reconciliation::{Fix, FixType, Granularity, Run};
use crate::database::reservation::Model as Reservation;
use crate::database::wallet::Model as Wallet;
use crate::database::{DatabaseError, Result};
use crate::pricing::{self, CreditClass};

const BATCH_SIZE: i64 = 500;
const STALE_HOLD_AGE: Duration = Duration::hours(2);
const SUBSCRIPTION_GRACE: Duration = Duration::hours(6);

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    found: i32,
    fixed: i32,
}

impl Counters {
    fn merge(&mut self, other: Counters) {
        self.found += other.found;
        self.fixed += other.fixed;
    }
}

/// Runs one reconciliation pass end to end, recording a [`Run`] row
/// regardless of which checks the granularity selects. `Safety` runs the
/// five local checks only; `PspComparison` runs only the provider diff;
/// `Full` runs both (§10.6).
pub async fn run(pool: &PgPool, psp: &dyn PaymentProvider, granularity: Granularity, now: DateTime<Utc>) -> Result<Run> {
    let run_row = Run::start(pool, granularity).await?;
    let mut counters = Counters::default();

    if matches!(granularity, Granularity::Safety | Granularity::Full) {
        counters.merge(check_purchases_missing_ledger(pool, run_row.id).await?);
        counters.merge(check_wallet_ledger_balance(pool, run_row.id).await?);
        counters.merge(check_stale_holds(pool, run_row.id, now).await?);
        counters.merge(check_missing_history(pool, run_row.id).await?);
        counters.merge(check_ready_unbilled(pool, run_row.id).await?);
        counters.merge(check_subscription_cycles(pool, run_row.id, now).await?);
    }

    if matches!(granularity, Granularity::PspComparison | Granularity::Full) {
        counters.merge(check_psp_comparison(pool, psp, run_row.id, now).await?);
    }

    Run::finish(pool, run_row.id, counters.found, counters.fixed).await
}

/// Check 1 ("purchases missing ledger"): completed purchases with no
/// matching `purchase_credit` ledger entry — `record_purchase` marked the
/// purchase row complete but crashed before the credit append. Repaired by
/// appending the missing entry directly; `core::ledger::append` is not used
/// here because the wallet-affecting side is identical to the original
/// grant and must replay with the purchase's own plan, not today's catalog.
async fn check_purchases_missing_ledger(pool: &PgPool, _run_id: Uuid) -> Result<Counters> {
    let missing = Purchase::fetch_completed_missing_ledger(pool, BATCH_SIZE).await?;
    let mut counters = Counters::default();

    for purchase in missing {
        counters.found += 1;

        let grant = pricing::plan_grant(&purchase.plan_code).map_err(DatabaseError::Pricing)?;
        let meta = serde_json::json!({ "payment_id": purchase.payment_id, "provider": purchase.provider });

        match crate::core::ledger::append(
            pool,
            purchase.identity,
            LedgerEntryType::PurchaseCredit,
            grant.credits,
            grant.class,
            "purchase",
            purchase.id,
            Some(meta),
        )
        .await
        {
            Ok(_) => counters.fixed += 1,
            Err(DatabaseError::DuplicateRef(_)) => counters.fixed += 1,
            Err(e) => return Err(e),
        }
    }

    Ok(counters)
}

/// Check 2 ("wallet vs ledger"): ledger-wins repair via
/// [`crate::core::wallet::recompute`], batched over every wallet row.
async fn check_wallet_ledger_balance(pool: &PgPool, run_id: Uuid) -> Result<Counters> {
    let mut counters = Counters::default();
    let mut offset = 0i64;

    loop {
        let wallets = Wallet::fetch_batch(pool, BATCH_SIZE, offset).await?;
        if wallets.is_empty() {
            break;
        }

        for wallet in &wallets {
            for class in [CreditClass::General, CreditClass::Video] {
                if let Some(drift) = crate::core::wallet::recompute(pool, run_id, wallet.identity, class).await? {
                    counters.found += 1;
                    counters.fixed += 1;
                    if drift != 0 {
                        tracing::warn!(identity = %wallet.identity, ?class, drift, "wallet cache repaired");
                    }
                }
            }
        }

        if (wallets.len() as i64) < BATCH_SIZE {
            break;
        }
        offset += BATCH_SIZE;
    }

    Ok(counters)
}

/// Check 3 ("stale holds"): `held` reservations whose job is terminally
/// failed or no longer exists are released with `reason=stale_job`, since
/// nothing will ever finalize them. Recorded as a [`Fix`] so operators can
/// see which holds reconciliation, not the expiry sweep, cleared.
async fn check_stale_holds(pool: &PgPool, run_id: Uuid, now: DateTime<Utc>) -> Result<Counters> {
    let older_than = now - STALE_HOLD_AGE;
    let stale = Reservation::fetch_stale_held(pool, older_than, BATCH_SIZE).await?;
    let mut counters = Counters::default();

    for reservation in stale {
        let job = Job::fetch_by_id(pool, reservation.job_id).await?;
        let dead = match &job {
            None => true,
            Some(j) => j.status.is_terminal_failure(),
        };

        if !dead {
            continue;
        }

        counters.found += 1;
        crate::core::reservation::release(pool, reservation.id, "stale_job").await?;

        let detail = format!("reservation {} released: job {} {}", reservation.id, reservation.job_id, job.map(|j| format!("{:?}", j.status)).unwrap_or_else(|| "missing".to_string()));
        if Fix::record_if_absent(pool, run_id, "internal", &reservation.id.to_string(), FixType::StaleReservation, &detail)
            .await?
            .is_some()
        {
            counters.fixed += 1;
        }
    }

    Ok(counters)
}

/// Check 4 ("missing history rows"): terminal-succeeded jobs with an asset
/// but no `app.history_items` row, backfilled in place.
async fn check_missing_history(pool: &PgPool, _run_id: Uuid) -> Result<Counters> {
    let succeeded = Job::fetch_succeeded_with_asset(pool, BATCH_SIZE).await?;
    let mut counters = Counters::default();

    for job in succeeded {
        let Some(asset_id) = job.asset_id else { continue };

        if HistoryItem::exists_for_job(pool, job.id).await? {
            continue;
        }

        counters.found += 1;
        HistoryItem::backfill(pool, job.id, asset_id).await?;
        counters.fixed += 1;
    }

    Ok(counters)
}

/// Check 5 ("ready-unbilled"): terminal-succeeded jobs whose reservation is
/// still `held` — the generation subsystem finished, but the credit
/// finalize that should follow never ran. Finalizing here closes the loop
/// without guessing an amount: the reservation already carries it.
async fn check_ready_unbilled(pool: &PgPool, _run_id: Uuid) -> Result<Counters> {
    let succeeded = Job::fetch_succeeded_with_asset(pool, BATCH_SIZE).await?;
    let mut counters = Counters::default();

    for job in succeeded {
        let Some(reservation_id) = job.reservation_id else { continue };

        let Some(reservation) = Reservation::fetch_by_id(pool, reservation_id).await? else { continue };
        if reservation.status != crate::database::reservation::ReservationStatus::Held {
            continue;
        }

        counters.found += 1;
        crate::core::reservation::finalize(pool, reservation_id).await?;
        counters.fixed += 1;
    }

    Ok(counters)
}

/// Subscription-cycle backstop: active subscriptions whose `next_credit_date`
/// is overdue by more than [`SUBSCRIPTION_GRACE`] — the periodic due-credit
/// sweep should have caught these already, so a hit here means the sweep
/// missed a tick.
async fn check_subscription_cycles(pool: &PgPool, run_id: Uuid, now: DateTime<Utc>) -> Result<Counters> {
    let overdue = crate::database::subscription::Model::fetch_due(pool, now - SUBSCRIPTION_GRACE, BATCH_SIZE).await?;
    let mut counters = Counters::default();

    for subscription in overdue {
        counters.found += 1;
        let billing_day = subscription.billing_day.unwrap_or(1) as u32;
        let period_start = subscription.next_credit_date.unwrap_or(now);
        let period_end = crate::core::period::next_monthly_date(period_start, billing_day);

        let granted = crate::core::subscription::grant_cycle(pool, subscription.id, period_start, period_end, None).await?;
        if !granted {
            continue;
        }

        let detail = format!("subscription {} granted missed cycle starting {}", subscription.id, period_start);
        if Fix::record_if_absent(
            pool,
            run_id,
            &subscription.provider,
            subscription.provider_subscription_id.as_deref().unwrap_or(""),
            FixType::MissingSubscriptionCycle,
            &detail,
        )
        .await?
        .is_some()
        {
            counters.fixed += 1;
        }
    }

    Ok(counters)
}

/// PSP-comparison pass (§4.I, §10.6): diffs the provider's payment list
/// against locally recorded purchases/cycles over the same window and
/// reconstructs missing records with the same primitives the webhook path
/// uses (§4.E `record_purchase`, §4.F `grant_cycle`/`suspend_for_revocation`)
/// — this pass is the retry for a webhook Mollie gave up delivering.
/// `record_if_absent` still gates each reconstruction so a drift that was
/// already fixed (or already filed because we can't safely reconstruct it,
/// e.g. no identity metadata) isn't repeated or re-alerted every run.
async fn check_psp_comparison(pool: &PgPool, psp: &dyn PaymentProvider, run_id: Uuid, now: DateTime<Utc>) -> Result<Counters> {
    let since = now - Duration::days(1);
    let mut counters = Counters::default();

    let remote = match psp.list_payments(since).await {
        Ok(payments) => payments,
        Err(err) => {
            tracing::warn!(error = %err, "psp comparison skipped: provider unavailable");
            return Ok(counters);
        }
    };

    let local = Purchase::fetch_paid_between(pool, "mollie", since, now).await?;

    for payment in &remote {
        match payment.status {
            crate::core::psp::PaymentStatus::Paid => {
                reconstruct_missing_paid(pool, run_id, payment, &local, &mut counters).await?
            }
            crate::core::psp::PaymentStatus::Refunded | crate::core::psp::PaymentStatus::ChargedBack => {
                reconstruct_missing_revocation(pool, run_id, payment, &local, &mut counters).await?
            }
            _ => {}
        }
    }

    Ok(counters)
}

/// A `paid` remote payment with no local counterpart. Subscription payments
/// (first-sequence or recurring) are reconstructed via `grant_cycle`, placed
/// in the correct monthly cycle by the period calculator on `paidAt` even if
/// this webhook arrived out of order relative to a later one already
/// processed; one-time purchases are reconstructed via `record_purchase`
/// using the identity/plan metadata the checkout attached to the payment.
/// A payment with neither a `subscriptionId` nor usable metadata can't be
/// safely attributed to an identity, so it's only filed for an operator.
async fn reconstruct_missing_paid(
    pool: &PgPool,
    run_id: Uuid,
    payment: &crate::core::psp::PaymentObject,
    local: &[crate::database::purchase::Model],
    counters: &mut Counters,
) -> Result<()> {
    if let Some(provider_subscription_id) = &payment.subscription_id {
        let Some(subscription) =
            crate::database::subscription::Model::fetch_by_provider_subscription_id(pool, provider_subscription_id).await?
        else {
            return file_unattributable(pool, run_id, payment, "psp subscription payment has no matching local subscription", counters).await;
        };

        let paid_at = payment.paid_at.unwrap_or(Utc::now());
        let billing_day = subscription.billing_day.unwrap_or(1) as u32;
        let (period_start, period_end) = crate::core::period::containing_period(paid_at, billing_day);

        let granted =
            crate::core::subscription::grant_cycle(pool, subscription.id, period_start, period_end, Some(&payment.payment_id)).await?;
        if !granted {
            return Ok(());
        }

        counters.found += 1;
        let detail = format!("subscription cycle for payment {} reconstructed from psp comparison", payment.payment_id);
        if Fix::record_if_absent(pool, run_id, "mollie", &payment.payment_id, FixType::MissingSubscriptionCycle, &detail)
            .await?
            .is_some()
        {
            counters.fixed += 1;
        }
        return Ok(());
    }

    if local.iter().any(|p| p.payment_id == payment.payment_id) {
        return Ok(());
    }

    let identity = payment.metadata.get("identity").and_then(|v| v.as_str()).and_then(|v| Uuid::try_parse(v).ok());
    let plan_code = payment.metadata.get("plan_code").and_then(|v| v.as_str());

    let (Some(identity), Some(plan_code)) = (identity, plan_code) else {
        return file_unattributable(pool, run_id, payment, "psp one-off payment is missing identity/plan_code metadata", counters).await;
    };

    counters.found += 1;
    let email = payment.metadata.get("email").and_then(|v| v.as_str());
    crate::core::purchase::record_purchase(pool, identity, plan_code, "mollie", &payment.payment_id, payment.amount_cents, email).await?;

    let detail = format!("purchase for payment {} reconstructed from psp comparison", payment.payment_id);
    if Fix::record_if_absent(pool, run_id, "mollie", &payment.payment_id, FixType::MissingPurchase, &detail)
        .await?
        .is_some()
    {
        counters.fixed += 1;
    }
    Ok(())
}

/// A `refunded`/`charged_back` remote payment whose local side never ran the
/// revocation: a completed purchase still marked `completed`, or an active
/// subscription not yet `suspended`. Reconstructed via the same
/// `revoke_purchase`/`suspend_for_revocation` primitives the webhook uses.
async fn reconstruct_missing_revocation(
    pool: &PgPool,
    run_id: Uuid,
    payment: &crate::core::psp::PaymentObject,
    local: &[crate::database::purchase::Model],
    counters: &mut Counters,
) -> Result<()> {
    let reason = if payment.status == crate::core::psp::PaymentStatus::Refunded { "refunded" } else { "charged_back" };

    if let Some(provider_subscription_id) = &payment.subscription_id {
        let Some(subscription) =
            crate::database::subscription::Model::fetch_by_provider_subscription_id(pool, provider_subscription_id).await?
        else {
            return Ok(());
        };
        if subscription.status == crate::database::subscription::SubscriptionStatus::Suspended {
            return Ok(());
        }

        counters.found += 1;
        crate::core::subscription::suspend_for_revocation(pool, provider_subscription_id, reason).await?;

        let detail = format!("subscription {} suspended for {} reconstructed from psp comparison", subscription.id, reason);
        if Fix::record_if_absent(pool, run_id, "mollie", &payment.payment_id, FixType::OrphanedPurchase, &detail)
            .await?
            .is_some()
        {
            counters.fixed += 1;
        }
        return Ok(());
    }

    let Some(purchase) = local.iter().find(|p| p.payment_id == payment.payment_id) else {
        return Ok(());
    };
    if purchase.status != crate::database::purchase::PurchaseStatus::Completed {
        return Ok(());
    }

    counters.found += 1;
    crate::core::purchase::revoke_purchase(pool, "mollie", &payment.payment_id, payment.status).await?;

    let detail = format!("purchase {} revocation ({}) reconstructed from psp comparison", purchase.id, reason);
    if Fix::record_if_absent(pool, run_id, "mollie", &payment.payment_id, FixType::OrphanedPurchase, &detail)
        .await?
        .is_some()
    {
        counters.fixed += 1;
    }
    Ok(())
}

async fn file_unattributable(
    pool: &PgPool,
    run_id: Uuid,
    payment: &crate::core::psp::PaymentObject,
    detail: &str,
    counters: &mut Counters,
) -> Result<()> {
    counters.found += 1;
    if Fix::record_if_absent(pool, run_id, "mollie", &payment.payment_id, FixType::MissingPurchase, detail)
        .await?
        .is_some()
    {
        crate::core::email::enqueue_admin_alert(
            pool,
            "admin_reconciliation_unattributable_payment",
            serde_json::json!({ "payment_id": payment.payment_id, "detail": detail }),
        )
        .await?;
    }
    Ok(())
}
