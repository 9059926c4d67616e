//! Bookkeeping for the reconciliation loop (§4.I, §10.6): one row per run,
//! one row per wallet-cache repair, one row per PSP-comparison fix. None of
//! these drive behaviour — they're the audit trail an operator reads after
//! the fact.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use super::{DatabaseError, Result, Tables, is_unique_violation};
use crate::pricing::CreditClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "reconciliation_granularity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Safety,
    PspComparison,
    Full,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Run {
    pub id: Uuid,
    pub granularity: Granularity,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub discrepancies_found: i32,
    pub discrepancies_fixed: i32,
}

impl Run {
    pub async fn start<'q, E>(pool: E, granularity: Granularity) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, granularity, started_at, finished_at, discrepancies_found, discrepancies_fixed)
             VALUES (gen_random_uuid(), $1, NOW(), NULL, 0, 0)
             RETURNING id, granularity, started_at, finished_at, discrepancies_found, discrepancies_fixed",
            Tables::RECONCILIATION_RUNS
        );

        sqlx::query_as(&q)
            .bind(granularity)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }

    pub async fn finish<'q, E>(
        pool: E,
        id: Uuid,
        discrepancies_found: i32,
        discrepancies_fixed: i32,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "UPDATE {} SET finished_at = NOW(), discrepancies_found = $2, discrepancies_fixed = $3
             WHERE id = $1
             RETURNING id, granularity, started_at, finished_at, discrepancies_found, discrepancies_fixed",
            Tables::RECONCILIATION_RUNS
        );

        sqlx::query_as(&q)
            .bind(id)
            .bind(discrepancies_found)
            .bind(discrepancies_fixed)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}

/// One wallet-cache repair: the ledger-wins correction applied when a
/// wallet's cached balance disagrees with `ledger::sum`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WalletRepair {
    pub id: Uuid,
    pub run_id: Uuid,
    pub identity: Uuid,
    pub credit_class: CreditClass,
    pub cached_balance: i64,
    pub ledger_sum: i64,
    pub created_at: DateTime<Utc>,
}

impl WalletRepair {
    pub async fn record<'q, E>(
        pool: E,
        run_id: Uuid,
        identity: Uuid,
        class: CreditClass,
        cached_balance: i64,
        ledger_sum: i64,
    ) -> Result<Self>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, run_id, identity, credit_class, cached_balance, ledger_sum, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NOW())
             RETURNING id, run_id, identity, credit_class, cached_balance, ledger_sum, created_at",
            Tables::WALLET_REPAIRS
        );

        sqlx::query_as(&q)
            .bind(run_id)
            .bind(identity)
            .bind(class)
            .bind(cached_balance)
            .bind(ledger_sum)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::Sqlx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "reconciliation_fix_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    MissingPurchase,
    OrphanedPurchase,
    StaleReservation,
    MissingSubscriptionCycle,
}

/// One PSP-comparison fix. `(provider, payment_id, fix_type)` is unique so
/// re-running the comparison against an unresolved drift doesn't file a
/// second identical fix record (and doesn't re-alert on it either).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Fix {
    pub id: Uuid,
    pub run_id: Uuid,
    pub provider: String,
    pub payment_id: String,
    pub fix_type: FixType,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl Fix {
    /// Returns `Ok(None)` when this exact drift was already recorded by an
    /// earlier run.
    pub async fn record_if_absent<'q, E>(
        pool: E,
        run_id: Uuid,
        provider: &str,
        payment_id: &str,
        fix_type: FixType,
        detail: &str,
    ) -> Result<Option<Self>>
    where
        E: 'q + Executor<'q, Database = Postgres>,
    {
        let q = format!(
            "INSERT INTO {} (id, run_id, provider, payment_id, fix_type, detail, created_at)
             VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, NOW())
             RETURNING id, run_id, provider, payment_id, fix_type, detail, created_at",
            Tables::RECONCILIATION_FIXES
        );

        let inserted: std::result::Result<Self, sqlx::Error> = sqlx::query_as(&q)
            .bind(run_id)
            .bind(provider)
            .bind(payment_id)
            .bind(fix_type)
            .bind(detail)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(fix) => Ok(Some(fix)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(DatabaseError::Sqlx(e)),
        }
    }
}
