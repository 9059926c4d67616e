//! Synchronous credit debit (§6 `POST /api/credits/charge`). Distinct from
//! [`crate::core::reservation`]: a charge has no hold phase and nothing to
//! release later — it resolves, checks, and debits in one transaction, for
//! actions whose cost and completion are both known at request time rather
//! than discovered later by an async job.

use sqlx::PgPool;
use uuid::Uuid;

use crate::database::job::Model as Job;
use crate::database::ledger::LedgerEntryType;
use crate::database::wallet::Model as Wallet;
use crate::database::{DatabaseError, Result};
use crate::errors::reservation::ReservationError;
use crate::pricing;

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct ChargeOutcome {
    pub new_balance: i64,
    pub charged: i64,
    pub idempotent: bool,
}

/// `action_key` resolves the same way [`crate::core::reservation::reserve`]
/// does; `job_id` doubles as the ledger's idempotency ref, so the same job
/// can safely retry a charge request without double-billing.
pub async fn charge(
    pool: &PgPool,
    identity: Uuid,
    job_id: Uuid,
    action_key: &str,
    meta: Option<serde_json::Value>,
) -> Result<ChargeOutcome> {
    let (_canonical, cost, class) = pricing::resolve(action_key).map_err(DatabaseError::Pricing)?;

    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    Wallet::ensure_exists(&mut *tx, identity).await?;
    let wallet = Wallet::lock_for_update(&mut *tx, identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;
    let balance = wallet.balance(class);

    if balance < cost {
        return Err(DatabaseError::Reservation(ReservationError::InsufficientCredits {
            required: cost,
            balance,
            reserved: 0,
            available: balance,
            class,
        }));
    }

    Job::ensure_placeholder(&mut *tx, job_id).await?;

    let append_result =
        crate::database::ledger::Model::append(&mut *tx, identity, LedgerEntryType::Charge, -cost, class, "job", job_id, meta)
            .await;

    let idempotent = match append_result {
        Ok(_) => false,
        Err(DatabaseError::DuplicateRef(_)) => true,
        Err(e) => return Err(e),
    };

    let wallet = Wallet::fetch(&mut *tx, identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(ChargeOutcome { new_balance: wallet.balance(class), charged: cost, idempotent })
}
