//! One-time purchase ingestion (§4.E). `start_checkout` is the only
//! function that talks to the PSP; `record_purchase`/`revoke_purchase` are
//! driven entirely from locally-held state once the webhook (or the
//! confirm-redirect poll) has fetched the payment.

use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::psp::{PaymentProvider, PaymentStatus};
use crate::database::identity::Model as Identity;
use crate::database::ledger::LedgerEntryType;
use crate::database::purchase::{Model as Purchase, PurchaseStatus};
use crate::database::{DatabaseError, Result};
use crate::pricing;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CheckoutOutcome {
    pub purchase_id: Uuid,
    pub checkout_url: String,
    pub payment_id: String,
}

/// §6 `POST /api/billing/checkout` (one-time branch). Creates the PSP
/// payment first, outside any database transaction (§5: PSP calls that
/// create new state happen outside critical sections), then records the
/// pending purchase locally.
pub async fn start_checkout(
    pool: &PgPool,
    psp: &dyn PaymentProvider,
    identity: Uuid,
    plan_code: &str,
    email: Option<&str>,
    redirect_url: &str,
    webhook_url: &str,
) -> Result<CheckoutOutcome> {
    let grant = pricing::plan_grant(plan_code)
        .map_err(DatabaseError::Pricing)?;

    let amount_cents = grant.credits * 10;
    let metadata = serde_json::json!({ "identity": identity, "plan_code": plan_code, "email": email });

    let checkout = psp
        .create_one_off_payment(amount_cents, plan_code, redirect_url, webhook_url, metadata)
        .await
        .map_err(DatabaseError::Psp)?;

    let purchase = Purchase::create_pending(
        pool,
        identity,
        plan_code,
        "mollie",
        &checkout.payment_id,
        amount_cents,
        "EUR",
    )
    .await?;

    Ok(CheckoutOutcome {
        purchase_id: purchase.id,
        checkout_url: checkout.checkout_url,
        payment_id: checkout.payment_id,
    })
}

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct RecordOutcome {
    pub purchase_id: Uuid,
    pub replayed: bool,
}

/// §4.E `record_purchase`. Steps 1-3 as specified; step 4 (email
/// attachment) and step 5 (outbox) are driven from here since both must
/// land in the same transaction as the ledger write (Invariant E1).
pub async fn record_purchase(
    pool: &PgPool,
    identity: Uuid,
    plan_code: &str,
    provider: &str,
    payment_id: &str,
    amount_cents: i64,
    email: Option<&str>,
) -> Result<RecordOutcome> {
    let grant = pricing::plan_grant(plan_code)
        .map_err(DatabaseError::Pricing)?;

    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let existing = Purchase::fetch_by_provider_ref(&mut *tx, provider, payment_id).await?;

    let purchase = match existing {
        Some(p) if p.status == PurchaseStatus::Completed => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(RecordOutcome { purchase_id: p.id, replayed: true });
        }
        Some(p) => p,
        None => {
            Purchase::create_pending(
                &mut *tx,
                identity,
                plan_code,
                provider,
                payment_id,
                amount_cents,
                "EUR",
            )
            .await?
        }
    };

    let completed = Purchase::mark_completed(&mut *tx, purchase.id).await?;

    let ledger_result = crate::database::ledger::Model::append(
        &mut *tx,
        identity,
        LedgerEntryType::PurchaseCredit,
        grant.credits,
        grant.class,
        "purchase",
        completed.id,
        None,
    )
    .await;

    match ledger_result {
        Ok(_) => {}
        Err(DatabaseError::DuplicateRef(_)) => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(RecordOutcome { purchase_id: completed.id, replayed: true });
        }
        Err(e) => return Err(e),
    }

    if let Some(email) = email {
        if let Some(row) = Identity::fetch_by_id(&mut *tx, identity).await? {
            if row.email.is_none() {
                let _ = Identity::attach_email_if_missing(&mut *tx, identity, email).await?;
            }
        }
    }

    crate::core::email::enqueue_for_purchase(
        &mut *tx,
        Some(identity),
        completed.id,
        "purchase_receipt",
        serde_json::json!({ "purchase_id": completed.id, "plan_code": plan_code, "credits": grant.credits }),
    )
    .await?;

    crate::core::email::enqueue_admin_alert(
        &mut *tx,
        "admin_purchase_completed",
        serde_json::json!({ "purchase_id": completed.id, "identity": identity, "amount_cents": amount_cents }),
    )
    .await?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(RecordOutcome { purchase_id: completed.id, replayed: false })
}

/// §4.E `revoke_purchase`. `status` selects between `refund` and
/// `chargeback` ledger entry types; both float the wallet at zero.
pub async fn revoke_purchase(pool: &PgPool, provider: &str, payment_id: &str, status: PaymentStatus) -> Result<()> {
    let entry_type = match status {
        PaymentStatus::Refunded => LedgerEntryType::Refund,
        PaymentStatus::ChargedBack => LedgerEntryType::Chargeback,
        _ => return Err(DatabaseError::Sqlx(sqlx::Error::Protocol("not a revocation status".to_string()))),
    };

    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let purchase = Purchase::fetch_by_provider_ref(&mut *tx, provider, payment_id)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;

    let grant = pricing::plan_grant(&purchase.plan_code)
        .map_err(DatabaseError::Pricing)?;

    let append_result = crate::database::ledger::Model::append_floored(
        &mut *tx,
        purchase.identity,
        entry_type,
        -grant.credits,
        grant.class,
        "purchase",
        purchase.id,
        None,
    )
    .await;

    match append_result {
        Ok(_) => {}
        Err(DatabaseError::DuplicateRef(_)) => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    match status {
        PaymentStatus::Refunded => {
            Purchase::mark_refunded(&mut *tx, purchase.id).await?;
        }
        PaymentStatus::ChargedBack => {
            Purchase::mark_charged_back(&mut *tx, purchase.id).await?;
        }
        _ => unreachable!(),
    }

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(())
}
