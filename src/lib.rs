//! Credit-accounting and payments-reconciliation core (§1-§2). `AppState`
//! is the one piece of shared process state every HTTP handler and
//! background sweep closes over: a database pool, the identity/session
//! stand-in, the PSP client, and the static configuration read at startup.

pub mod auth;
pub mod config;
pub mod core;
pub mod database;
pub mod errors;
pub mod models;
pub mod pricing;
pub mod routes;

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::AuthSessions;
use crate::core::psp::PaymentProvider;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub auth: AuthSessions,
    pub config: Arc<config::Config>,
    pub psp: Arc<dyn PaymentProvider>,
}
