//! The immutable ledger (§3 "LedgerEntry", §4.A). `append` is the single
//! idempotency pivot for the whole system: every other subsystem's
//! duplicate-webhook/duplicate-cron safety reduces to a unique-index
//! violation on this table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::{Executor, PgConnection, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables, is_unique_violation};
use crate::pricing::CreditClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    PurchaseCredit,
    ReservationFinalize,
    Refund,
    Chargeback,
    AdminAdjust,
    SignupGrant,
    SubscriptionGrant,
    Charge,
}

impl LedgerEntryType {
    /// Entry types allowed to take a wallet balance negative, per §4.A.
    /// `reservation_hold` is intentionally absent from this set: holds never
    /// touch the ledger (§4.D Invariant R2), so the only practical member is
    /// `admin_adjust`.
    pub fn allows_negative_balance(self) -> bool {
        matches!(self, LedgerEntryType::AdminAdjust)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub identity: Uuid,
    pub entry_type: LedgerEntryType,
    pub amount: i64,
    pub credit_class: CreditClass,
    pub ref_type: String,
    pub ref_id: Uuid,
    pub meta: Option<Json>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Inserts the ledger row and updates the wallet balance in one
    /// statement pair, under the caller's already-held wallet row lock
    /// (§4.A: "Centralising the wallet update in `append` makes W1 a local
    /// consequence of successful append"). Returns [`DatabaseError::DuplicateRef`]
    /// when the partial unique index on `(ref_type, ref_id, entry_type)`
    /// rejects the insert; callers must treat that as already-applied.
    pub async fn append(
        conn: &mut PgConnection,
        identity: Uuid,
        entry_type: LedgerEntryType,
        delta: i64,
        class: CreditClass,
        ref_type: &str,
        ref_id: Uuid,
        meta: Option<Json>,
    ) -> Result<Self> {
        if delta < 0 && !entry_type.allows_negative_balance() {
            let balance = super::wallet::Model::lock_for_update(&mut *conn, identity)
                .await?
                .map(|w| w.balance(class))
                .unwrap_or(0);
            if balance + delta < 0 {
                return Err(DatabaseError::InsufficientBalance {
                    required: -delta,
                    available: balance,
                });
            }
        }

        let q = format!(
            "INSERT INTO {} (id, identity, entry_type, amount, credit_class, ref_type, ref_id, meta, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, NOW())
             RETURNING id, identity, entry_type, amount, credit_class, ref_type, ref_id, meta, created_at",
            Tables::LEDGER_ENTRIES
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(identity)
            .bind(entry_type)
            .bind(delta)
            .bind(class)
            .bind(ref_type)
            .bind(ref_id)
            .bind(meta)
            .fetch_one(&mut *conn)
            .await;

        let entry = match inserted {
            Ok(entry) => entry,
            Err(e) if is_unique_violation(&e) => {
                return Err(DatabaseError::DuplicateRef(format!(
                    "{ref_type}:{ref_id}:{entry_type:?}"
                )));
            }
            Err(e) => return Err(DatabaseError::Sqlx(e)),
        };

        super::wallet::Model::apply_delta(&mut *conn, identity, class, delta).await?;

        Ok(entry)
    }

    /// Inserts the ledger row with the exact signed `delta` (so Invariant
    /// P2's "refund(-credits_granted)" reads literally from the ledger),
    /// but applies the wallet update floored at zero instead of rejecting
    /// on insufficient balance. Used only by `revoke_purchase` (§4.E, §9
    /// Open Questions): a user who already spent refunded credits must not
    /// have the refund itself error out.
    pub async fn append_floored(
        conn: &mut PgConnection,
        identity: Uuid,
        entry_type: LedgerEntryType,
        delta: i64,
        class: CreditClass,
        ref_type: &str,
        ref_id: Uuid,
        meta: Option<Json>,
    ) -> Result<Self> {
        let q = format!(
            "INSERT INTO {} (id, identity, entry_type, amount, credit_class, ref_type, ref_id, meta, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, NOW())
             RETURNING id, identity, entry_type, amount, credit_class, ref_type, ref_id, meta, created_at",
            Tables::LEDGER_ENTRIES
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(identity)
            .bind(entry_type)
            .bind(delta)
            .bind(class)
            .bind(ref_type)
            .bind(ref_id)
            .bind(meta)
            .fetch_one(&mut *conn)
            .await;

        let entry = match inserted {
            Ok(entry) => entry,
            Err(e) if is_unique_violation(&e) => {
                return Err(DatabaseError::DuplicateRef(format!(
                    "{ref_type}:{ref_id}:{entry_type:?}"
                )));
            }
            Err(e) => return Err(DatabaseError::Sqlx(e)),
        };

        super::wallet::Model::apply_delta_floored(&mut *conn, identity, class, delta).await?;

        Ok(entry)
    }

    /// Unlocked read of the ledger sum for `(identity, class)`. Used only by
    /// repair/verification (§4.A), never by mutators.
    pub async fn sum<'q, E>(pool: E, identity: Uuid, class: CreditClass) -> Result<i64>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT COALESCE(SUM(amount), 0) FROM {} WHERE identity = $1 AND credit_class = $2",
            Tables::LEDGER_ENTRIES
        );

        sqlx::query_scalar(&q)
            .bind(identity)
            .bind(class)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

}
