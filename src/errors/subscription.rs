use actix_web::{error, http::StatusCode};

/// Errors from §4.F's subscription state machine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscriptionError {
    #[error("identity already has an active or pending subscription")]
    AlreadySubscribed,

    #[error("subscription {0} not found")]
    NotFound(uuid::Uuid),

    #[error("subscription {0} is not in a state that allows this transition")]
    InvalidTransition(uuid::Uuid),
}

impl error::ResponseError for SubscriptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            SubscriptionError::AlreadySubscribed => StatusCode::CONFLICT,
            SubscriptionError::NotFound(_) => StatusCode::NOT_FOUND,
            SubscriptionError::InvalidTransition(_) => StatusCode::CONFLICT,
        }
    }
}
