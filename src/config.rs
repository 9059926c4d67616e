//! Process configuration, read once at startup. Direct `std::env::var`
//! reads from `main.rs`, plus the billing-specific knobs left as
//! "configurable, default X".

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub database_url: String,

    /// §4.D: `R_expiry`, default 20 minutes.
    pub reservation_expiry: Duration,
    /// §4.I: default 100 repairs per category per reconciliation run.
    pub reconciliation_batch_size: i64,
    /// §4.F due-credit sweep: bounded batch size.
    pub due_credit_batch_size: i64,
    /// §4.H email outbox worker: bounded batch size per drain.
    pub email_batch_size: i64,

    pub webhook_base_url: String,
    pub mollie_api_key: String,

    /// §4.D background sweep: how often to release expired holds.
    pub reservation_sweep_interval: Duration,
    /// §4.F background sweep: how often to grant due subscription cycles
    /// and expire lapsed cancellations.
    pub subscription_sweep_interval: Duration,
    /// §4.H: cron expression governing the email outbox dispatcher tick,
    /// reusing `croner` the way `subs.rs` does for cron expressions.
    pub email_dispatch_cron: String,
    /// §4.I: cron expression governing the reconciliation loop's `Safety`
    /// tick. `PspComparison`/`Full` run on coarser multiples of this.
    pub reconciliation_cron: String,
}

fn env_var(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} is not set in .env file"))
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_duration_minutes(key: &str, default_minutes: u64) -> Duration {
    let minutes = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_minutes);
    Duration::from_secs(minutes * 60)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse::<i64>().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_url: env_var("SERVER_URL"),
            database_url: env_var("DATABASE_URL"),
            reservation_expiry: env_duration_minutes("RESERVATION_EXPIRY_MINUTES", 20),
            reconciliation_batch_size: env_i64("RECONCILIATION_BATCH_SIZE", 100),
            due_credit_batch_size: env_i64("DUE_CREDIT_BATCH_SIZE", 200),
            email_batch_size: env_i64("EMAIL_OUTBOX_BATCH_SIZE", 50),
            webhook_base_url: env_var_or("WEBHOOK_BASE_URL", "http://localhost:8080"),
            mollie_api_key: env_var_or("MOLLIE_API_KEY", ""),
            reservation_sweep_interval: env_duration_minutes("RESERVATION_SWEEP_MINUTES", 5),
            subscription_sweep_interval: env_duration_minutes("SUBSCRIPTION_SWEEP_MINUTES", 60),
            email_dispatch_cron: env_var_or("EMAIL_DISPATCH_CRON", "*/1 * * * *"),
            reconciliation_cron: env_var_or("RECONCILIATION_CRON", "*/15 * * * *"),
        }
    }
}
