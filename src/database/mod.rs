//! Persistence layer. Thin `sqlx` wrappers over the `billing` schema tables;
//! business rules live in [`crate::core`], not here.

pub mod email_outbox;
pub mod history_item;
pub mod identity;
pub mod job;
pub mod ledger;
pub mod mollie_customer;
pub mod purchase;
pub mod reconciliation;
pub mod reservation;
pub mod subscription;
pub mod subscription_cycle;
pub mod wallet;

use crate::errors::{
    psp::PspError, purchase::PurchaseError, reservation::ReservationError,
    subscription::SubscriptionError,
};
use crate::pricing::PricingError;

/// Table names, namespaced the way `main.rs`'s `APP_SCHEMA`/`BILLING_SCHEMA`
/// env vars namespace the two Postgres schemas.
pub struct Tables;

impl Tables {
    pub const WALLETS: &'static str = "billing.wallets";
    pub const LEDGER_ENTRIES: &'static str = "billing.ledger_entries";
    pub const RESERVATIONS: &'static str = "billing.reservations";
    pub const JOBS: &'static str = "app.jobs";
    pub const PURCHASES: &'static str = "billing.purchases";
    pub const SUBSCRIPTIONS: &'static str = "billing.subscriptions";
    pub const SUBSCRIPTION_CYCLES: &'static str = "billing.subscription_cycles";
    pub const EMAIL_OUTBOX: &'static str = "billing.email_outbox";
    pub const WALLET_REPAIRS: &'static str = "billing.wallet_repairs";
    pub const RECONCILIATION_RUNS: &'static str = "billing.reconciliation_runs";
    pub const RECONCILIATION_FIXES: &'static str = "billing.reconciliation_fixes";
    pub const MOLLIE_CUSTOMERS: &'static str = "billing.mollie_customers";
    pub const HISTORY_ITEMS: &'static str = "app.history_items";
    pub const IDENTITIES: &'static str = "app.identities";
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error(transparent)]
    Psp(#[from] PspError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// A write collided with a partial unique index guarding idempotency
    /// (ref_type/ref_id, or (subscription, period_start)). Callers must
    /// treat this as "already applied" and fetch the prior result — it
    /// never escapes to an HTTP layer as-is.
    #[error("duplicate ref: {0}")]
    DuplicateRef(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Classifies a `sqlx::Error` coming back from an insert guarded by a
/// partial unique index as either a genuine duplicate (caller should treat
/// as replayed) or a real error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error(), Some(db_err) if db_err.is_unique_violation())
}
