use actix_web::{error, http::StatusCode};

use crate::pricing::CreditClass;

/// Errors from §4.D's reservation manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReservationError {
    #[error(
        "insufficient {class:?} credits: required {required}, balance {balance}, reserved {reserved}, available {available}"
    )]
    InsufficientCredits {
        required: i64,
        balance: i64,
        reserved: i64,
        available: i64,
        class: CreditClass,
    },

    #[error("reservation {0} not found")]
    NotFound(uuid::Uuid),
}

impl error::ResponseError for ReservationError {
    fn status_code(&self) -> StatusCode {
        match self {
            ReservationError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}
