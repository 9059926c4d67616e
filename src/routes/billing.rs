//! `/api/billing/*` (§6): reservations, one-time checkout/confirm, and the
//! subscription surface. `/billing/webhook/{provider}` lives in
//! [`crate::routes::webhook`] since it sits outside `/api` and is
//! unauthenticated by bearer token (§6 "authenticated only by being able to
//! fetch the payment via the adapter").

use actix_web::{HttpResponse, get, post, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::AppState;
use crate::auth::{Identity, check_bearer};
use crate::core::purchase::CheckoutOutcome as PurchaseCheckout;
use crate::core::reservation::ReserveOutcome;
use crate::core::subscription::CheckoutOutcome as SubscriptionCheckout;
use crate::database::purchase::Model as Purchase;
use crate::database::subscription::{Model as Subscription, SubscriptionStatus};
use crate::errors::CoreError;
use crate::errors::auth::AuthError;
use crate::models::responses::ApiResponse;
use crate::pricing;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/billing")
            .service(reserve)
            .service(checkout)
            .service(confirm)
            .service(
                web::scope("/subscriptions")
                    .service(subscribe)
                    .service(cancel)
                    .service(status),
            ),
    );
}

fn redirect_url(state: &AppState) -> String {
    format!("{}/billing/redirect", state.config.server_url)
}

fn webhook_url(state: &AppState) -> String {
    format!("{}/billing/webhook/mollie", state.config.webhook_base_url)
}

/// §6 "the email, if supplied, must equal the verified email on the
/// identity (case-insensitive) or 403 EMAIL_MISMATCH". An identity with no
/// verified email yet imposes no constraint — the supplied address is
/// simply attached the first time a purchase completes (§4.E step 4).
fn check_email_match(identity: &Identity, supplied: Option<&str>) -> Result<(), AuthError> {
    let (Some(supplied), true, Some(on_file)) = (supplied, identity.email_verified, identity.email.as_deref()) else {
        return Ok(());
    };

    if supplied.eq_ignore_ascii_case(on_file) {
        Ok(())
    } else {
        Err(AuthError::EmailMismatch { identity_email: on_file.to_string() })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveRequest {
    pub action_key: String,
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReserveResponse {
    pub reservation: ReserveOutcome,
    pub balance: i64,
    pub reserved: i64,
    pub available: i64,
}

/// §4.D `reserve`. 402 (with the required/balance/reserved/available detail)
/// comes straight through [`crate::errors::reservation::ReservationError`].
#[utoipa::path(
    post,
    path = "/api/billing/reserve",
    request_body = ReserveRequest,
    responses(
        (status = 200, description = "Reservation created or replayed", body = ReserveResponse),
        (status = 402, description = "Insufficient credits"),
    ),
    security(("bearerAuth" = [])),
)]
#[post("/reserve")]
pub async fn reserve(
    state: web::Data<AppState>,
    auth: Option<BearerAuth>,
    body: web::Json<ReserveRequest>,
) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;
    let body = body.into_inner();

    let outcome = crate::core::reservation::reserve(
        &state.pool,
        identity.id,
        body.job_id,
        &body.action_key,
        state.config.reservation_expiry,
    )
    .await?;

    let (_canonical, _cost, class) = pricing::resolve(&body.action_key).map_err(crate::database::DatabaseError::Pricing)?;
    let view = crate::core::wallet::get(&state.pool, identity.id).await?;
    let class_view = match class {
        pricing::CreditClass::General => view.general,
        pricing::CreditClass::Video => view.video,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::ok(ReserveResponse {
        reservation: outcome,
        balance: class_view.balance,
        reserved: class_view.reserved,
        available: class_view.available,
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub plan_code: String,
    pub email: Option<String>,
}

/// §4.E `start_checkout`, one-time purchase branch.
#[utoipa::path(
    post,
    path = "/api/billing/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout started", body = PurchaseCheckout),
        (status = 403, description = "Supplied email does not match the verified email on file"),
    ),
    security(("bearerAuth" = [])),
)]
#[post("/checkout")]
pub async fn checkout(
    state: web::Data<AppState>,
    auth: Option<BearerAuth>,
    body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;
    let body = body.into_inner();

    check_email_match(&identity, body.email.as_deref()).map_err(CoreError::Auth)?;

    let outcome = crate::core::purchase::start_checkout(
        &state.pool,
        state.psp.as_ref(),
        identity.id,
        &body.plan_code,
        body.email.as_deref(),
        &redirect_url(&state),
        &webhook_url(&state),
    )
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct ConfirmQuery {
    pub payment_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfirmResponse {
    pub payment_id: String,
    pub status: String,
    pub purchase_id: Option<Uuid>,
}

/// Idempotent post-redirect confirmation (§6): re-runs the same dispatch a
/// webhook delivery would have run, then reports whatever local state
/// resulted — a frontend landing on the redirect URL before the webhook
/// arrives still sees the credited purchase, not a stale pending one.
#[utoipa::path(
    get,
    path = "/api/billing/confirm",
    params(ConfirmQuery),
    responses((status = 200, description = "Confirmation result", body = ConfirmResponse)),
    security(("bearerAuth" = [])),
)]
#[get("/confirm")]
pub async fn confirm(
    state: web::Data<AppState>,
    auth: Option<BearerAuth>,
    query: web::Query<ConfirmQuery>,
) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;
    let webhook_url = webhook_url(&state);

    crate::core::webhook::handle(&state.pool, state.psp.as_ref(), &webhook_url, &query.payment_id).await?;

    let purchase = Purchase::fetch_by_provider_ref(&state.pool, "mollie", &query.payment_id).await?;

    let (status, purchase_id) = match purchase {
        Some(p) if p.identity == identity.id => (format!("{:?}", p.status).to_lowercase(), Some(p.id)),
        Some(_) => return Err(CoreError::Auth(AuthError::Unauthorized)),
        None => ("not_a_purchase".to_string(), None),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::ok(ConfirmResponse { payment_id: query.payment_id.clone(), status, purchase_id })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub plan_code: String,
}

/// §4.F "Checkout".
#[utoipa::path(
    post,
    path = "/api/billing/subscriptions/checkout",
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription checkout started", body = SubscriptionCheckout),
        (status = 409, description = "Already subscribed"),
    ),
    security(("bearerAuth" = [])),
)]
#[post("/checkout")]
pub async fn subscribe(
    state: web::Data<AppState>,
    auth: Option<BearerAuth>,
    body: web::Json<SubscribeRequest>,
) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;
    let body = body.into_inner();

    let outcome = crate::core::subscription::start_checkout(
        &state.pool,
        state.psp.as_ref(),
        identity.id,
        &body.plan_code,
        identity.email.as_deref(),
        &redirect_url(&state),
        &webhook_url(&state),
    )
    .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

/// §4.F "Cancel": soft cancel, access continues until `current_period_end`.
#[utoipa::path(
    post,
    path = "/api/billing/subscriptions/cancel",
    responses(
        (status = 200, description = "Subscription cancelled"),
        (status = 404, description = "No subscription to cancel"),
    ),
    security(("bearerAuth" = [])),
)]
#[post("/cancel")]
pub async fn cancel(state: web::Data<AppState>, auth: Option<BearerAuth>) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;

    let subscription = Subscription::fetch_blocking_by_identity(&state.pool, identity.id)
        .await?
        .ok_or(CoreError::NotFound("subscription"))?;

    crate::core::subscription::cancel(&state.pool, subscription.id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(())))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionStatusView {
    pub subscribed: bool,
    pub plan_code: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub next_payment_date: Option<chrono::DateTime<chrono::Utc>>,
    pub current_period_end: Option<chrono::DateTime<chrono::Utc>>,
    pub mandate_status: String,
    pub tier_perks: Vec<String>,
}

fn tier_perks(plan_code: &str) -> Vec<String> {
    let Ok(plan) = pricing::subscription_plan(plan_code) else {
        return Vec::new();
    };

    vec![
        format!("{} credits per month", plan.credits_per_month),
        format!("{:?} credit class", plan.class).to_lowercase(),
        format!("{:?} billing", plan.cadence).to_lowercase(),
    ]
}

/// §6: "full current subscription view including `billing.next_payment_date`,
/// `billing.mandate_status`, `tier_perks`". Surfaces the most recent
/// subscription row regardless of status, since a lapsed or cancelled
/// subscription is still meaningful to show the caller.
#[utoipa::path(
    get,
    path = "/api/billing/subscriptions/status",
    responses((status = 200, description = "Subscription status", body = SubscriptionStatusView)),
    security(("bearerAuth" = [])),
)]
#[get("/status")]
pub async fn status(state: web::Data<AppState>, auth: Option<BearerAuth>) -> Result<HttpResponse, CoreError> {
    let identity = check_bearer(&state, auth).await?;

    let subscription = Subscription::fetch_latest_by_identity(&state.pool, identity.id).await?;

    let view = match subscription {
        None => SubscriptionStatusView {
            subscribed: false,
            plan_code: None,
            status: None,
            next_payment_date: None,
            current_period_end: None,
            mandate_status: "none".to_string(),
            tier_perks: Vec::new(),
        },
        Some(s) => SubscriptionStatusView {
            subscribed: matches!(s.status, SubscriptionStatus::Active | SubscriptionStatus::PastDue),
            plan_code: Some(s.plan_code.clone()),
            next_payment_date: s.next_credit_date,
            current_period_end: s.current_period_end,
            mandate_status: if s.mandate_id.is_some() { "active".to_string() } else { "none".to_string() },
            tier_perks: tier_perks(&s.plan_code),
            status: Some(s.status),
        },
    };

    Ok(HttpResponse::Ok().json(ApiResponse::ok(view)))
}
