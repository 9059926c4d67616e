//! Wallet cache row (§3 "Wallet", §4.B). No external writer besides
//! [`crate::core::ledger::append`] and [`crate::core::wallet::recompute`].

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables};
use crate::pricing::CreditClass;

#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct Model {
    pub identity: Uuid,
    pub balance_general: i64,
    pub balance_video: i64,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub async fn fetch<'q, E>(pool: E, identity: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT identity, balance_general, balance_video, updated_at FROM {} WHERE identity = $1",
            Tables::WALLETS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Ensures a zero-balance wallet row exists for `identity`. Idempotent.
    pub async fn ensure_exists<'q, E>(pool: E, identity: Uuid) -> Result<()>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (identity, balance_general, balance_video, updated_at)
             VALUES ($1, 0, 0, NOW())
             ON CONFLICT (identity) DO NOTHING",
            Tables::WALLETS
        );

        sqlx::query(&q)
            .bind(identity)
            .execute(pool)
            .await
            .map_err(DatabaseError::Sqlx)?;

        Ok(())
    }

    /// Bounded page of wallets, in `identity` order so repeated
    /// reconciliation batches make steady progress. Read-only, unlocked.
    pub async fn fetch_batch<'q, E>(pool: E, limit: i64, offset: i64) -> Result<Vec<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT identity, balance_general, balance_video, updated_at FROM {}
             ORDER BY identity ASC LIMIT $1 OFFSET $2",
            Tables::WALLETS
        );

        sqlx::query_as(&q).bind(limit).bind(offset).fetch_all(pool).await.map_err(DatabaseError::Sqlx)
    }

    /// Locks the wallet row for the duration of the enclosing transaction.
    /// Every balance-affecting operation in §5 serialises on this lock.
    pub async fn lock_for_update<'q, E>(pool: E, identity: Uuid) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "SELECT identity, balance_general, balance_video, updated_at FROM {} WHERE identity = $1 FOR UPDATE",
            Tables::WALLETS
        );

        sqlx::query_as(&q)
            .bind(identity)
            .fetch_optional(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub fn balance(&self, class: CreditClass) -> i64 {
        match class {
            CreditClass::General => self.balance_general,
            CreditClass::Video => self.balance_video,
        }
    }

    /// Applies `delta` to `class`'s balance and bumps `updated_at`. Caller
    /// must already hold the row lock (via [`Self::lock_for_update`]).
    pub async fn apply_delta<'q, E>(
        pool: E,
        identity: Uuid,
        class: CreditClass,
        delta: i64,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let column = match class {
            CreditClass::General => "balance_general",
            CreditClass::Video => "balance_video",
        };

        let q = format!(
            "UPDATE {} SET {column} = {column} + $1, updated_at = NOW()
             WHERE identity = $2
             RETURNING identity, balance_general, balance_video, updated_at",
            Tables::WALLETS
        );

        sqlx::query_as(&q)
            .bind(delta)
            .bind(identity)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Applies `delta` (expected negative) floored at zero:
    /// `balance := GREATEST(0, balance + delta)`. Used only by
    /// [`crate::core::purchase::revoke_purchase`]'s refund/chargeback path,
    /// which must never reject for insufficient balance (§4.E, §9 Open
    /// Questions "floor to zero and surface the shortfall in
    /// reconciliation"). Caller must already hold the row lock.
    pub async fn apply_delta_floored<'q, E>(
        pool: E,
        identity: Uuid,
        class: CreditClass,
        delta: i64,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let column = match class {
            CreditClass::General => "balance_general",
            CreditClass::Video => "balance_video",
        };

        let q = format!(
            "UPDATE {} SET {column} = GREATEST(0, {column} + $1), updated_at = NOW()
             WHERE identity = $2
             RETURNING identity, balance_general, balance_video, updated_at",
            Tables::WALLETS
        );

        sqlx::query_as(&q)
            .bind(delta)
            .bind(identity)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    /// Overwrites `class`'s balance with an absolute value, used only by
    /// [`crate::core::wallet::recompute`]'s ledger-wins repair.
    pub async fn set_balance<'q, E>(
        pool: E,
        identity: Uuid,
        class: CreditClass,
        new_balance: i64,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let column = match class {
            CreditClass::General => "balance_general",
            CreditClass::Video => "balance_video",
        };

        let q = format!(
            "UPDATE {} SET {column} = $1, updated_at = NOW()
             WHERE identity = $2
             RETURNING identity, balance_general, balance_video, updated_at",
            Tables::WALLETS
        );

        sqlx::query_as(&q)
            .bind(new_balance)
            .bind(identity)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}
