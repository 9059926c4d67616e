//! Email outbox business logic (§4.H). `enqueue` is meant to be called
//! inside the caller's own transaction (Invariant E1); the dispatcher is a
//! separate worker that only ever reads `pending` rows.

use serde_json::Value as Json;
use sqlx::{Executor, Postgres};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::email_outbox::Model as Email;
use crate::database::Result;

/// Writes a `pending` outbox row. Callers pass their own transaction
/// handle so the row commits atomically with the event it describes.
pub async fn enqueue<'q, E>(
    pool: E,
    identity: Option<Uuid>,
    template: &str,
    payload: Json,
) -> Result<Email>
where
    E: 'q + Executor<'q, Database = Postgres>,
{
    Email::enqueue(pool, identity, None, template, payload, false).await
}

/// Same as [`enqueue`], but links the row to `purchase_id` so the
/// dispatcher mirrors its eventual delivery status onto
/// `billing.purchases.email_status` (§4.H).
pub async fn enqueue_for_purchase<'q, E>(
    pool: E,
    identity: Option<Uuid>,
    purchase_id: Uuid,
    template: &str,
    payload: Json,
) -> Result<Email>
where
    E: 'q + Executor<'q, Database = Postgres>,
{
    Email::enqueue(pool, identity, Some(purchase_id), template, payload, false).await
}

/// Admin-alert rows are enqueued the same way, but flagged so the
/// dispatcher never lets a failed admin alert enqueue a second one
/// (§4.H's recursion guard).
pub async fn enqueue_admin_alert<'q, E>(pool: E, template: &str, payload: Json) -> Result<Email>
where
    E: 'q + Executor<'q, Database = Postgres>,
{
    Email::enqueue(pool, None, None, template, payload, true).await
}

/// A template handler renders and actually sends one outbox row. Out of
/// scope (the email renderer and SMTP client are external collaborators)
/// — this trait is the seam the outbox worker calls through.
#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &Email) -> std::result::Result<(), String>;
}

/// A sender that only logs; used when no real SMTP collaborator is wired
/// in (local dev, tests).
pub struct LoggingSender;

#[async_trait::async_trait]
impl EmailSender for LoggingSender {
    async fn send(&self, email: &Email) -> std::result::Result<(), String> {
        info!(id = %email.id, template = %email.template, "dispatching email (logging sender)");
        Ok(())
    }
}

/// Drains up to `batch_size` pending rows and attempts delivery through
/// `sender`. On failure: increments `attempts`, and once `MAX_ATTEMPTS` is
/// reached, parks the row as `failed` and enqueues exactly one admin alert
/// — guarded by `is_admin_alert` so an alert about a failed alert never
/// recurses.
pub async fn dispatch_pending(
    pool: &sqlx::PgPool,
    sender: &dyn EmailSender,
    batch_size: i64,
) -> Result<usize> {
    let claimed = Email::claim_pending(pool, batch_size).await?;
    let mut sent = 0;

    for email in claimed {
        match sender.send(&email).await {
            Ok(()) => {
                let updated = Email::mark_sent(pool, email.id).await?;
                mirror_purchase_email_status(pool, &updated).await?;
                sent += 1;
            }
            Err(err) => {
                warn!(id = %email.id, error = %err, "email dispatch failed");
                let updated = Email::record_failure(pool, email.id, &err).await?;
                mirror_purchase_email_status(pool, &updated).await?;

                if updated.status == crate::database::email_outbox::EmailStatus::Failed
                    && !updated.is_admin_alert
                {
                    let payload = serde_json::json!({
                        "original_email_id": updated.id,
                        "template": updated.template,
                        "last_error": updated.last_error,
                    });
                    enqueue_admin_alert(pool, "admin_email_delivery_failed", payload).await?;
                }
            }
        }
    }

    Ok(sent)
}

/// §4.H: "linked purchase rows receive a mirrored email_status column
/// update for cheap lookup" — a no-op for rows with no `purchase_id`.
async fn mirror_purchase_email_status(pool: &sqlx::PgPool, email: &Email) -> Result<()> {
    if let Some(purchase_id) = email.purchase_id {
        crate::database::purchase::Model::set_email_status(pool, purchase_id, email.status).await?;
    }
    Ok(())
}
