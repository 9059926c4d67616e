pub mod auth;
pub mod psp;
pub mod purchase;
pub mod reservation;
pub mod subscription;

use actix_web::{HttpResponse, error, http::StatusCode};

use crate::database::DatabaseError;
use crate::models::responses::{ApiError, ApiResponse, ErrorDetail, ErrorPayload};
use crate::pricing::PricingError;
use auth::AuthError;
use psp::PspError;
use purchase::PurchaseError;
use reservation::ReservationError;
use subscription::SubscriptionError;

/// Top-level error type returned by every HTTP handler in `routes`.
/// Each subsystem keeps its own `thiserror` enum (`errors::auth::AuthError`,
/// `errors::subscription::SubscriptionError`, and so on); this wraps them
/// so a single `?` works across handler bodies.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Psp(#[from] PspError),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(&'static str),
}

impl From<DatabaseError> for CoreError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::Reservation(e) => CoreError::Reservation(e),
            DatabaseError::Subscription(e) => CoreError::Subscription(e),
            DatabaseError::Purchase(e) => CoreError::Purchase(e),
            DatabaseError::Psp(e) => CoreError::Psp(e),
            DatabaseError::Pricing(e) => CoreError::Pricing(e),
            other => CoreError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(value: sqlx::Error) -> Self {
        CoreError::Database(value.to_string())
    }
}

impl error::ResponseError for CoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Auth(e) => e.status_code(),
            CoreError::Pricing(_) => StatusCode::BAD_REQUEST,
            CoreError::Reservation(e) => e.status_code(),
            CoreError::Purchase(e) => e.status_code(),
            CoreError::Subscription(e) => e.status_code(),
            CoreError::Psp(_) => StatusCode::BAD_GATEWAY,
            CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.code();
        let message = self.to_string();
        let details: &[ErrorDetail] = &[];

        let body: ApiResponse<'_, ()> = ApiResponse {
            data: None,
            meta: None,
            error: Some(ApiError {
                code,
                message: &message,
                details,
                detail: self.detail(),
            }),
            message: None,
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl CoreError {
    /// The structured detail payload for error kinds §7 documents one for;
    /// every other kind has none.
    fn detail(&self) -> Option<ErrorPayload> {
        match self {
            CoreError::Reservation(ReservationError::InsufficientCredits {
                required,
                balance,
                reserved,
                available,
                class,
            }) => Some(ErrorPayload::InsufficientCredits {
                required: *required,
                balance: *balance,
                reserved: *reserved,
                available: *available,
                class: *class,
            }),
            CoreError::Auth(AuthError::EmailMismatch { identity_email }) => {
                Some(ErrorPayload::EmailMismatch { identity_email: identity_email.clone() })
            }
            _ => None,
        }
    }

    /// Stable machine-readable code, per the documented error-code policy.
    fn code(&self) -> &'static str {
        match self {
            CoreError::Auth(AuthError::EmailMismatch { .. }) => "EMAIL_MISMATCH",
            CoreError::Auth(_) => "UNAUTHORIZED",
            CoreError::Pricing(PricingError::UnknownAction(_)) => "UNKNOWN_ACTION",
            CoreError::Pricing(PricingError::UnknownPlan(_)) => "UNKNOWN_PLAN",
            CoreError::Reservation(ReservationError::InsufficientCredits { .. }) => {
                "INSUFFICIENT_CREDITS"
            }
            CoreError::Reservation(_) => "RESERVATION_ERROR",
            CoreError::Purchase(_) => "PURCHASE_ERROR",
            CoreError::Subscription(SubscriptionError::AlreadySubscribed) => "ALREADY_SUBSCRIBED",
            CoreError::Subscription(_) => "SUBSCRIPTION_ERROR",
            CoreError::Psp(_) => "PSP_UNAVAILABLE",
            CoreError::Database(_) => "INTERNAL_ERROR",
            CoreError::NotFound(_) => "NOT_FOUND",
        }
    }
}
