//! Business logic (§4). Every module here is a thin layer over the
//! `database` models: it owns transaction boundaries, cross-model
//! invariants, and calls out to `psp`/`email` where an operation requires an
//! external side effect. Nothing in here talks to the database directly
//! without going through a `database::*::Model` method.

pub mod background;
pub mod charge;
pub mod email;
pub mod ledger;
pub mod period;
pub mod psp;
pub mod purchase;
pub mod reconciliation;
pub mod reservation;
pub mod subscription;
pub mod wallet;
pub mod webhook;
