//! Ledger business logic (§4.A). Thin: almost all of the invariant work is
//! already centralised in [`crate::database::ledger::Model::append`]; this
//! module exists so call sites depend on `core::ledger`, not the row model,
//! matching the layering the rest of `core` uses.

use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ledger::{LedgerEntryType, Model as LedgerEntry};
use crate::database::{DatabaseError, Result};
use crate::pricing::CreditClass;

/// Appends a ledger entry and updates the cached wallet balance
/// transactionally. A duplicate `(ref_type, ref_id, entry_type)` is
/// returned as [`DatabaseError::DuplicateRef`] rather than silently
/// reapplied — callers that expect idempotent replay (webhooks, cron)
/// must match on that variant explicitly.
#[allow(clippy::too_many_arguments)]
pub async fn append(
    pool: &PgPool,
    identity: Uuid,
    entry_type: LedgerEntryType,
    delta: i64,
    class: CreditClass,
    ref_type: &str,
    ref_id: Uuid,
    meta: Option<Json>,
) -> Result<LedgerEntry> {
    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    crate::database::wallet::Model::ensure_exists(&mut *tx, identity).await?;

    let entry =
        LedgerEntry::append(&mut *tx, identity, entry_type, delta, class, ref_type, ref_id, meta)
            .await?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(entry)
}

/// Unlocked ledger sum, used only by reconciliation/verification.
pub async fn sum(pool: &PgPool, identity: Uuid, class: CreditClass) -> Result<i64> {
    LedgerEntry::sum(pool, identity, class).await
}
