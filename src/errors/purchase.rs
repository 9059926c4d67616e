use actix_web::{error, http::StatusCode};

/// Errors from §4.E's purchase ingestor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PurchaseError {
    #[error("purchase for payment {0} not found")]
    NotFound(String),

    #[error("payment {0} is in an unexpected state for this operation: {1}")]
    UnexpectedStatus(String, String),
}

impl error::ResponseError for PurchaseError {
    fn status_code(&self) -> StatusCode {
        match self {
            PurchaseError::NotFound(_) => StatusCode::NOT_FOUND,
            PurchaseError::UnexpectedStatus(..) => StatusCode::BAD_REQUEST,
        }
    }
}
