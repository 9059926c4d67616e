use actix_web::{error, http::StatusCode};

/// Errors from the §4.G PSP adapter boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PspError {
    #[error("PSP is unavailable: {0}")]
    Unavailable(String),

    #[error("PSP rejected payment/subscription creation: {0}")]
    CreateError(String),

    #[error("PSP returned an unexpected payload: {0}")]
    MalformedResponse(String),
}

impl error::ResponseError for PspError {
    fn status_code(&self) -> StatusCode {
        match self {
            PspError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            PspError::CreateError(_) => StatusCode::BAD_GATEWAY,
            PspError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
