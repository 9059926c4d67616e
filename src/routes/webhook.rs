//! `POST /billing/webhook/{provider}` (§6). Lives outside `/api`: PSPs post
//! here directly, with no bearer token, and the only trust we place in the
//! request is the payment id — everything else is re-fetched from the PSP
//! in [`crate::core::webhook::handle`].

use actix_web::{HttpResponse, post, web};
use serde::Deserialize;

use crate::AppState;
use crate::database::DatabaseError;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/billing").service(receive));
}

#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    id: String,
}

/// Mollie posts its webhook body as `application/x-www-form-urlencoded`
/// (`id=tr_xxx`) in production, though §6 also allows a plain JSON body for
/// other callers/tests. `web::Bytes` lets one handler accept either instead
/// of registering two extractors that would otherwise fight over the same
/// route.
fn extract_payment_id(body: &[u8], content_type: Option<&str>) -> Option<String> {
    let is_json = content_type.is_some_and(|ct| ct.contains("json"));

    if is_json {
        serde_json::from_slice::<WebhookBody>(body).ok().map(|b| b.id)
    } else {
        serde_urlencoded::from_bytes::<WebhookBody>(body)
            .ok()
            .map(|b| b.id)
            .or_else(|| serde_json::from_slice::<WebhookBody>(body).ok().map(|b| b.id))
    }
}

/// Per §4.E/§6: "a webhook must always ack 200 once its transaction commits
/// or once a fetch from the provider fails — the provider should not retry
/// forever on a payment we can't look up. Only a local (database)
/// failure should produce a 5xx, so the provider retries those."
#[post("/webhook/{provider}")]
pub async fn receive(
    state: web::Data<AppState>,
    provider: web::Path<String>,
    req: actix_web::HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    if provider.as_str() != "mollie" {
        return HttpResponse::NotFound().finish();
    }

    let content_type = req.headers().get("content-type").and_then(|v| v.to_str().ok());
    let Some(payment_id) = extract_payment_id(&body, content_type) else {
        return HttpResponse::BadRequest().finish();
    };

    let webhook_url = format!("{}/billing/webhook/{}", state.config.webhook_base_url, provider.as_str());

    match crate::core::webhook::handle(&state.pool, state.psp.as_ref(), &webhook_url, &payment_id).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(DatabaseError::Psp(e)) => {
            tracing::warn!(%payment_id, error = %e, "webhook fetch from provider failed, acking anyway");
            HttpResponse::Ok().finish()
        }
        Err(e) => {
            tracing::error!(%payment_id, error = %e, "webhook processing failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}
