use actix_web::{error, http::StatusCode};

/// Errors raised by the identity/session boundary (§6's "Identity
/// collaborator").
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer auth token in header")]
    MissingBearer,
    #[error("This session is not authorized to operate on this resource")]
    Unauthorized,
    #[error("The provided token either does not exist, or has expired")]
    InvalidSession,
    #[error("Supplied email does not match the verified email on this identity")]
    EmailMismatch { identity_email: String },
}

impl error::ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::EmailMismatch { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}
