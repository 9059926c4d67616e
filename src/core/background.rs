//! Background sweeps (§4.D `sweep_expired`, §4.F due-credit sweep/expiry
//! sweep, §4.H outbox dispatcher, §4.I reconciliation loop). Each sweep is
//! its own `tokio::spawn`ed long-running task, restartable independently.
//! None of these hold an application-level lock across a tick (§5 "No
//! application-level mutex is used") — every row-level guarantee comes
//! from the database.

use std::str::FromStr;
use std::sync::Arc;

use croner::Cron;
use sqlx::PgPool;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::psp::PaymentProvider;
use crate::database::reconciliation::Granularity;

/// §4.D: releases every hold past `expires_at` on a fixed tick. Safe to run
/// concurrently with another instance — each row transitions at most once.
pub fn spawn_reservation_sweep(pool: PgPool, config: Arc<Config>) {
    tokio::spawn(async move {
        let mut ticker = interval(config.reservation_sweep_interval);
        loop {
            ticker.tick().await;
            match crate::core::reservation::sweep_expired(&pool).await {
                Ok(n) if n > 0 => info!(released = n, "reservation sweep released expired holds"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reservation sweep failed"),
            }
        }
    });
}

/// §4.F: grants due monthly cycles and expires lapsed cancellations on a
/// fixed tick, bounded per the configured batch size.
pub fn spawn_subscription_sweep(pool: PgPool, config: Arc<Config>) {
    tokio::spawn(async move {
        let mut ticker = interval(config.subscription_sweep_interval);
        loop {
            ticker.tick().await;

            match crate::core::subscription::sweep_due_credits(&pool, config.due_credit_batch_size).await {
                Ok(n) if n > 0 => info!(granted = n, "due-credit sweep granted cycles"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "due-credit sweep failed"),
            }

            match crate::core::subscription::sweep_expired_cancellations(&pool).await {
                Ok(n) if n > 0 => info!(expired = n, "cancellation sweep expired subscriptions"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "cancellation sweep failed"),
            }
        }
    });
}

/// §4.H: drains the outbox on a cron tick, using a
/// `Cron::from_str(...).find_next_occurrence` schedule rather than a fixed
/// interval, since operators may want a finer or coarser cadence
/// than every sweep shares.
pub fn spawn_email_dispatch(pool: PgPool, config: Arc<Config>, sender: Arc<dyn crate::core::email::EmailSender>) {
    tokio::spawn(async move {
        let cron = match Cron::from_str(&config.email_dispatch_cron) {
            Ok(c) => c,
            Err(err) => {
                error!(error = %err, expr = %config.email_dispatch_cron, "invalid email dispatch cron expression, sweep disabled");
                return;
            }
        };

        loop {
            let now = chrono::Utc::now();
            let Ok(next) = cron.find_next_occurrence(&now, false) else {
                error!("email dispatch cron could not compute next occurrence, sweep disabled");
                return;
            };

            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
            tokio::time::sleep(wait).await;

            match crate::core::email::dispatch_pending(&pool, sender.as_ref(), config.email_batch_size).await {
                Ok(n) if n > 0 => info!(sent = n, "email outbox dispatched"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "email dispatch failed"),
            }
        }
    });
}

/// §4.I: runs the reconciliation loop on a cron tick. `Safety` (the five
/// local checks) runs every tick; `PspComparison` runs every third tick
/// since it costs a PSP round-trip, giving a `Full` pass roughly every
/// third `Safety` interval without doubling the provider call volume.
pub fn spawn_reconciliation(pool: PgPool, config: Arc<Config>, psp: Arc<dyn PaymentProvider>) {
    tokio::spawn(async move {
        let cron = match Cron::from_str(&config.reconciliation_cron) {
            Ok(c) => c,
            Err(err) => {
                error!(error = %err, expr = %config.reconciliation_cron, "invalid reconciliation cron expression, loop disabled");
                return;
            }
        };

        let mut tick_count: u64 = 0;

        loop {
            let now = chrono::Utc::now();
            let Ok(next) = cron.find_next_occurrence(&now, false) else {
                error!("reconciliation cron could not compute next occurrence, loop disabled");
                return;
            };

            let wait = (next - now).to_std().unwrap_or(Duration::from_secs(900));
            tokio::time::sleep(wait).await;

            tick_count += 1;
            let granularity = if tick_count % 3 == 0 { Granularity::Full } else { Granularity::Safety };

            match crate::core::reconciliation::run(&pool, psp.as_ref(), granularity, chrono::Utc::now()).await {
                Ok(run) => info!(
                    run_id = %run.id,
                    ?granularity,
                    found = run.discrepancies_found,
                    fixed = run.discrepancies_fixed,
                    "reconciliation run completed"
                ),
                Err(err) => warn!(error = %err, "reconciliation run failed"),
            }
        }
    });
}
