use actix_web::HttpResponse;

use crate::errors::CoreError;

#[allow(clippy::unused_async)]
pub async fn not_found() -> Result<HttpResponse, CoreError> {
    Err(CoreError::NotFound("route"))
}
