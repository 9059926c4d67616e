//! `/api/credits/*` (§6): the read-mostly wallet view and the synchronous
//! charge endpoint. Both require a resolved identity.

use actix_web::{HttpResponse, get, post, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;
use crate::auth::check_bearer;
use crate::core::charge::ChargeOutcome;
use crate::core::wallet::WalletView;
use crate::errors::CoreError;
use crate::models::responses::ApiResponse;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(wallet).service(charge);
}

/// Current wallet balances for the calling identity, split by credit class.
#[utoipa::path(
    get,
    path = "/api/credits/wallet",
    responses((status = 200, description = "Wallet view", body = WalletView)),
    security(("bearerAuth" = [])),
)]
#[get("/wallet")]
pub async fn wallet(state: web::Data<AppState>, auth: Option<BearerAuth>) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;

    let view = crate::core::wallet::get(&state.pool, identity.id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(view)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChargeRequest {
    pub action: String,
    pub job_id: Uuid,
    pub upstream_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Debits credits for an action whose cost and completion are both known
/// synchronously (no reservation hold phase). Idempotent per `job_id`.
#[utoipa::path(
    post,
    path = "/api/credits/charge",
    request_body = ChargeRequest,
    responses(
        (status = 200, description = "Charge result", body = ChargeOutcome),
        (status = 402, description = "Insufficient credits"),
    ),
    security(("bearerAuth" = [])),
)]
#[post("/charge")]
pub async fn charge(
    state: web::Data<AppState>,
    auth: Option<BearerAuth>,
    body: web::Json<ChargeRequest>,
) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;
    let body = body.into_inner();

    let meta = if body.upstream_id.is_some() || body.metadata.is_some() {
        Some(serde_json::json!({ "upstream_id": body.upstream_id, "metadata": body.metadata }))
    } else {
        None
    };

    let outcome = crate::core::charge::charge(&state.pool, identity.id, body.job_id, &body.action, meta).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}
