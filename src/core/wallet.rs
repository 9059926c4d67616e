//! Wallet cache business logic (§3 "Wallet", §4.B). The database layer
//! already enforces the locking; this module is the read API callers use
//! (`get`, `reserved`, `available`) and the repair op reconciliation drives
//! (`recompute`).

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::reconciliation::WalletRepair;
use crate::database::reservation::Model as Reservation;
use crate::database::wallet::Model as Wallet;
use crate::database::{DatabaseError, Result};
use crate::pricing::CreditClass;

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct ClassView {
    pub balance: i64,
    pub reserved: i64,
    pub available: i64,
}

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct WalletView {
    pub identity: Uuid,
    pub general: ClassView,
    pub video: ClassView,
}

/// `reserved(identity, class)`: always computed by summing held, unexpired
/// reservations — never stored (§4.B).
pub async fn reserved(pool: &PgPool, identity: Uuid, class: CreditClass) -> Result<i64> {
    Reservation::reserved_total(pool, identity, class, Utc::now()).await
}

async fn class_view(pool: &PgPool, identity: Uuid, balance: i64, class: CreditClass) -> Result<ClassView> {
    let reserved = reserved(pool, identity, class).await?;
    Ok(ClassView {
        balance,
        reserved,
        available: balance - reserved,
    })
}

/// `get(identity) -> {balance_general, balance_video}` plus the derived
/// `reserved`/`available` views §4.B's read API exposes.
pub async fn get(pool: &PgPool, identity: Uuid) -> Result<WalletView> {
    crate::database::wallet::Model::ensure_exists(pool, identity).await?;
    let wallet = Wallet::fetch(pool, identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;

    Ok(WalletView {
        identity,
        general: class_view(pool, identity, wallet.balance_general, CreditClass::General).await?,
        video: class_view(pool, identity, wallet.balance_video, CreditClass::Video).await?,
    })
}

/// Ledger-wins repair (§4.B, §4.I check 2): overwrites the cached balance
/// with `ledger::sum` under the wallet row lock, recording a
/// [`WalletRepair`] only when the two actually differ — `recompute` on a
/// consistent wallet is a no-op (§8 "Round-trip").
pub async fn recompute(
    pool: &PgPool,
    run_id: Uuid,
    identity: Uuid,
    class: CreditClass,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let locked = Wallet::lock_for_update(&mut *tx, identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;
    let cached = locked.balance(class);

    let ledger_sum = crate::database::ledger::Model::sum(&mut *tx, identity, class).await?;

    // The cache never goes negative even though the ledger legitimately can
    // (§4.E's floor-at-zero refund rule, §9 Open Questions): a negative
    // ledger sum repairs to zero, not to the negative value, so this is a
    // fixed point once applied — a second run sees cached=0 == floor(sum)
    // and repairs nothing further.
    let target = ledger_sum.max(0);

    if cached == target {
        tx.commit().await.map_err(DatabaseError::Sqlx)?;
        return Ok(None);
    }

    Wallet::set_balance(&mut *tx, identity, class, target).await?;
    WalletRepair::record(&mut *tx, run_id, identity, class, cached, ledger_sum).await?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(Some(target - cached))
}
