//! Reservation manager (§4.D). `reserve` is the one call site that holds
//! both the wallet row lock and the active-reservation range lock at once —
//! every other mutator only needs the narrower lock it actually touches.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::job::Model as Job;
use crate::database::ledger::LedgerEntryType;
use crate::database::reservation::{Model as Reservation, ReservationStatus};
use crate::database::wallet::Model as Wallet;
use crate::database::{DatabaseError, Result};
use crate::errors::reservation::ReservationError;
use crate::pricing;

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct ReserveOutcome {
    pub reservation_id: Uuid,
    pub amount: i64,
    pub expires_at: chrono::DateTime<Utc>,
}

/// §4.D steps 1-7. `action_key` is normalised and priced first (step 1),
/// then the idempotent-replay lookup (step 2) runs before any lock is
/// taken — a replayed `(identity, job_id, action_key)` never contends for
/// the wallet lock at all. `expiry` is `Config::reservation_expiry`
/// (default 20 minutes, §4.D), passed in rather than read from a global so
/// this function stays a plain async fn over `&PgPool`.
pub async fn reserve(
    pool: &PgPool,
    identity: Uuid,
    job_id: Uuid,
    action_key: &str,
    expiry: std::time::Duration,
) -> Result<ReserveOutcome> {
    let (canonical, cost, class) = pricing::resolve(action_key).map_err(DatabaseError::Pricing)?;

    let now = Utc::now();

    if let Some(existing) = Reservation::fetch_active(pool, identity, job_id, &canonical, now).await? {
        return Ok(ReserveOutcome {
            reservation_id: existing.id,
            amount: existing.amount,
            expires_at: existing.expires_at,
        });
    }

    let expiry = Utc::now()
        + chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::minutes(20));

    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    Wallet::ensure_exists(&mut *tx, identity).await?;
    let wallet = Wallet::lock_for_update(&mut *tx, identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;
    let balance = wallet.balance(class);

    let active = Reservation::lock_active_for_class(&mut *tx, identity, class, now).await?;
    let reserved: i64 = active.iter().map(|r| r.amount).sum();
    let available = balance - reserved;

    if available < cost {
        return Err(DatabaseError::Reservation(ReservationError::InsufficientCredits {
            required: cost,
            balance,
            reserved,
            available,
            class,
        }));
    }

    let reservation =
        Reservation::create(&mut *tx, identity, job_id, &canonical, class, cost, expiry).await?;

    Job::ensure_placeholder(&mut *tx, job_id).await?;
    Job::set_reservation(&mut *tx, job_id, reservation.id).await?;

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(ReserveOutcome {
        reservation_id: reservation.id,
        amount: reservation.amount,
        expires_at: reservation.expires_at,
    })
}

/// §4.D step 8 / §8 scenarios 2-3: the caller-facing result of settling a
/// hold. `was_already_finalized`/`was_already_released` distinguish a
/// genuine no-op replay from a fresh state change, since a job-status
/// poller may call finalize twice for the same job without ever seeing an
/// error for it.
#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct FinalizeOutcome {
    pub reservation_id: Uuid,
    pub was_already_finalized: bool,
    pub was_already_released: bool,
    pub new_balance: Option<i64>,
}

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct ReleaseOutcome {
    pub reservation_id: Uuid,
    pub was_already_finalized: bool,
    pub was_already_released: bool,
}

/// §4.D step 8: converts a held reservation into a ledger debit. Idempotent
/// — a reservation already `finalized` reports `was_already_finalized`
/// rather than appending a second ledger entry, since the ledger's own
/// `(ref_type, ref_id, entry_type)` unique index guards against a
/// concurrent double-finalize regardless. Finalizing an already-`released`
/// hold is a no-op too (§8 scenario 3) — it never resurrects credit that
/// was already given back.
pub async fn finalize(pool: &PgPool, reservation_id: Uuid) -> Result<FinalizeOutcome> {
    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let reservation = Reservation::lock_for_update(&mut *tx, reservation_id)
        .await?
        .ok_or(DatabaseError::Reservation(ReservationError::NotFound(reservation_id)))?;

    match reservation.status {
        ReservationStatus::Finalized => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(FinalizeOutcome {
                reservation_id: reservation.id,
                was_already_finalized: true,
                was_already_released: false,
                new_balance: None,
            });
        }
        ReservationStatus::Released => {
            tx.commit().await.map_err(DatabaseError::Sqlx)?;
            return Ok(FinalizeOutcome {
                reservation_id: reservation.id,
                was_already_finalized: false,
                was_already_released: true,
                new_balance: None,
            });
        }
        ReservationStatus::Held => {}
    }

    crate::database::ledger::Model::append(
        &mut *tx,
        reservation.identity,
        LedgerEntryType::ReservationFinalize,
        -reservation.amount,
        reservation.credit_class,
        "reservation",
        reservation.id,
        None,
    )
    .await?;

    Reservation::mark_finalized(&mut *tx, reservation.id).await?;

    let wallet = Wallet::lock_for_update(&mut *tx, reservation.identity)
        .await?
        .ok_or_else(|| DatabaseError::Sqlx(sqlx::Error::RowNotFound))?;
    let new_balance = wallet.balance(reservation.credit_class);

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(FinalizeOutcome {
        reservation_id: reservation.id,
        was_already_finalized: false,
        was_already_released: false,
        new_balance: Some(new_balance),
    })
}

/// §4.D step 9: releases a held reservation without touching the ledger
/// (Invariant R2). Releasing an already-terminal reservation is a no-op,
/// not an error — both finalize and release can legitimately race a sweep.
pub async fn release(pool: &PgPool, reservation_id: Uuid, reason: &str) -> Result<ReleaseOutcome> {
    let mut tx = pool.begin().await.map_err(DatabaseError::Sqlx)?;

    let reservation = Reservation::lock_for_update(&mut *tx, reservation_id)
        .await?
        .ok_or(DatabaseError::Reservation(ReservationError::NotFound(reservation_id)))?;

    let outcome = match reservation.status {
        ReservationStatus::Held => {
            Reservation::mark_released(&mut *tx, reservation.id, reason).await?;
            ReleaseOutcome {
                reservation_id: reservation.id,
                was_already_finalized: false,
                was_already_released: false,
            }
        }
        ReservationStatus::Finalized => ReleaseOutcome {
            reservation_id: reservation.id,
            was_already_finalized: true,
            was_already_released: false,
        },
        ReservationStatus::Released => ReleaseOutcome {
            reservation_id: reservation.id,
            was_already_finalized: false,
            was_already_released: true,
        },
    };

    tx.commit().await.map_err(DatabaseError::Sqlx)?;

    Ok(outcome)
}

/// Periodic sweep (§4.D, driven by [`crate::core::background`]): bulk
/// releases every hold past `expires_at`. Returns the count released, for
/// the caller to log.
pub async fn sweep_expired(pool: &PgPool) -> Result<usize> {
    let swept = Reservation::sweep_expired(pool, Utc::now()).await?;
    Ok(swept.len())
}
