//! PSP webhook dispatch (§4.E, §4.F, §6 "PSP webhook (in)"). The handler
//! itself only ever receives a payment id — every other fact about the
//! payment is re-fetched from the provider, since the id is the only part
//! of the request we don't trust.

use sqlx::PgPool;

use crate::core::psp::{PaymentObject, PaymentProvider, PaymentStatus};
use crate::database::{DatabaseError, Result};

/// Runs [`PaymentProvider::fetch_payment`] then dispatches on its status.
/// Never touches the database for `Open`/`Pending`/`Failed` (one-off) /
/// `Canceled`/`Expired` — those are pure acknowledgements (§4.E).
pub async fn handle(pool: &PgPool, psp: &dyn PaymentProvider, webhook_url: &str, payment_id: &str) -> Result<()> {
    let payment = psp.fetch_payment(payment_id).await.map_err(DatabaseError::Psp)?;

    match payment.status {
        PaymentStatus::Open | PaymentStatus::Pending => Ok(()),
        PaymentStatus::Paid => handle_paid(pool, psp, webhook_url, &payment).await,
        PaymentStatus::Refunded | PaymentStatus::ChargedBack => handle_revoked(pool, &payment).await,
        PaymentStatus::Failed => handle_failed(pool, &payment).await,
        PaymentStatus::Canceled | PaymentStatus::Expired => Ok(()),
    }
}

/// A first-sequence subscription payment is tagged `type=subscription_first`
/// in its own checkout metadata (§4.F); a recurring payment instead carries
/// a `subscriptionId` the Mollie API sets itself. Anything else is a
/// one-time purchase.
async fn handle_paid(pool: &PgPool, psp: &dyn PaymentProvider, webhook_url: &str, payment: &PaymentObject) -> Result<()> {
    let is_first_sequence = payment.metadata.get("type").and_then(|v| v.as_str()) == Some("subscription_first");

    if is_first_sequence {
        let customer_id = payment
            .customer_id
            .as_deref()
            .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::Protocol("paid subscription_first payment missing customerId".to_string())))?;
        let mandate_id = payment
            .mandate_id
            .as_deref()
            .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::Protocol("paid subscription_first payment missing mandateId".to_string())))?;

        crate::core::subscription::activate_first_payment(pool, psp, &payment.payment_id, mandate_id, customer_id, webhook_url)
            .await?;
        return Ok(());
    }

    if let Some(provider_subscription_id) = &payment.subscription_id {
        let paid_at = payment.paid_at.unwrap_or_else(chrono::Utc::now);
        crate::core::subscription::recurring_payment_paid(pool, provider_subscription_id, paid_at, &payment.payment_id).await?;
        return Ok(());
    }

    let identity = payment
        .metadata
        .get("identity")
        .and_then(|v| v.as_str())
        .and_then(|v| uuid::Uuid::try_parse(v).ok())
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::Protocol("paid payment missing identity metadata".to_string())))?;
    let plan_code = payment
        .metadata
        .get("plan_code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::Protocol("paid payment missing plan_code metadata".to_string())))?;
    let email = payment.metadata.get("email").and_then(|v| v.as_str());

    crate::core::purchase::record_purchase(pool, identity, plan_code, "mollie", &payment.payment_id, payment.amount_cents, email)
        .await?;

    Ok(())
}

async fn handle_revoked(pool: &PgPool, payment: &PaymentObject) -> Result<()> {
    if let Some(provider_subscription_id) = &payment.subscription_id {
        let reason = if payment.status == PaymentStatus::Refunded { "refunded" } else { "charged_back" };
        crate::core::subscription::suspend_for_revocation(pool, provider_subscription_id, reason).await?;
        return Ok(());
    }

    crate::core::purchase::revoke_purchase(pool, "mollie", &payment.payment_id, payment.status).await
}

async fn handle_failed(pool: &PgPool, payment: &PaymentObject) -> Result<()> {
    if let Some(provider_subscription_id) = &payment.subscription_id {
        crate::core::subscription::mark_past_due(pool, provider_subscription_id).await?;
    }

    Ok(())
}
