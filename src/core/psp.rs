//! PSP adapter (§4.G). Pure IO boundary: no database access, no retry (the
//! reconciliation loop is the retry). `Mollie` is the one production
//! implementation, talking to the Mollie REST API over `reqwest`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::errors::psp::PspError;

pub type Result<T> = std::result::Result<T, PspError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutPayment {
    pub payment_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Open,
    Pending,
    Paid,
    Failed,
    Canceled,
    Expired,
    Refunded,
    ChargedBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentObject {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub mandate_id: Option<String>,
    pub metadata: Json,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// §4.G's operation set. Implemented by [`Mollie`] in production and a
/// `FakeProvider` in tests, dispatched via `async_trait`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_one_off_payment(
        &self,
        amount_cents: i64,
        description: &str,
        redirect_url: &str,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<CheckoutPayment>;

    async fn create_first_sequence_payment(
        &self,
        customer_id: &str,
        amount_cents: i64,
        redirect_url: &str,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<CheckoutPayment>;

    async fn get_or_create_customer(&self, identity: uuid::Uuid, email: Option<&str>) -> Result<String>;

    async fn get_valid_mandate(&self, customer_id: &str) -> Result<Option<String>>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        mandate_id: &str,
        interval: &str,
        amount_cents: i64,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<String>;

    async fn cancel_subscription(&self, customer_id: &str, subscription_id: &str) -> Result<bool>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentObject>;

    async fn list_payments(&self, since: chrono::DateTime<chrono::Utc>) -> Result<Vec<PaymentObject>>;
}

/// Mollie implementation, grounded in `mollie_service.py`. Talks to the
/// Mollie REST API over `reqwest`; every non-2xx or malformed body maps to
/// [`PspError`] rather than panicking, since PSP calls sit on the critical
/// checkout path (§5 "PSP calls are made outside of critical database
/// sections when creating new state").
pub struct Mollie {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Mollie {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.mollie.com/v2".to_string(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl PaymentProvider for Mollie {
    async fn create_one_off_payment(
        &self,
        amount_cents: i64,
        description: &str,
        redirect_url: &str,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<CheckoutPayment> {
        let body = serde_json::json!({
            "amount": { "currency": "EUR", "value": format!("{:.2}", amount_cents as f64 / 100.0) },
            "description": description,
            "redirectUrl": redirect_url,
            "webhookUrl": webhook_url,
            "metadata": metadata,
        });

        let resp = self
            .client
            .post(format!("{}/payments", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::CreateError(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        extract_checkout(&parsed)
    }

    async fn create_first_sequence_payment(
        &self,
        customer_id: &str,
        amount_cents: i64,
        redirect_url: &str,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<CheckoutPayment> {
        let body = serde_json::json!({
            "amount": { "currency": "EUR", "value": format!("{:.2}", amount_cents as f64 / 100.0) },
            "customerId": customer_id,
            "sequenceType": "first",
            "redirectUrl": redirect_url,
            "webhookUrl": webhook_url,
            "metadata": metadata,
        });

        let resp = self
            .client
            .post(format!("{}/payments", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::CreateError(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        extract_checkout(&parsed)
    }

    async fn get_or_create_customer(&self, identity: uuid::Uuid, email: Option<&str>) -> Result<String> {
        let body = serde_json::json!({
            "name": identity.to_string(),
            "email": email,
            "metadata": { "identity": identity.to_string() },
        });

        let resp = self
            .client
            .post(format!("{}/customers", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::CreateError(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        parsed
            .get("id")
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| PspError::MalformedResponse("missing customer id".to_string()))
    }

    async fn get_valid_mandate(&self, customer_id: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .get(format!("{}/customers/{customer_id}/mandates", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::CreateError(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        let mandates = parsed
            .get("_embedded")
            .and_then(|e| e.get("mandates"))
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(mandates
            .iter()
            .find(|m| m.get("status").and_then(Json::as_str) == Some("valid"))
            .and_then(|m| m.get("id"))
            .and_then(Json::as_str)
            .map(str::to_string))
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        mandate_id: &str,
        interval: &str,
        amount_cents: i64,
        webhook_url: &str,
        metadata: Json,
    ) -> Result<String> {
        let body = serde_json::json!({
            "amount": { "currency": "EUR", "value": format!("{:.2}", amount_cents as f64 / 100.0) },
            "interval": interval,
            "mandateId": mandate_id,
            "webhookUrl": webhook_url,
            "metadata": metadata,
        });

        let resp = self
            .client
            .post(format!("{}/customers/{customer_id}/subscriptions", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::CreateError(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        parsed
            .get("id")
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| PspError::MalformedResponse("missing subscription id".to_string()))
    }

    async fn cancel_subscription(&self, customer_id: &str, subscription_id: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(format!(
                "{}/customers/{customer_id}/subscriptions/{subscription_id}",
                self.base_url
            ))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        Ok(resp.status().is_success())
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentObject> {
        let resp = self
            .client
            .get(format!("{}/payments/{payment_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::Unavailable(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        parse_payment(&parsed)
    }

    async fn list_payments(&self, since: chrono::DateTime<chrono::Utc>) -> Result<Vec<PaymentObject>> {
        let resp = self
            .client
            .get(format!("{}/payments", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| PspError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PspError::Unavailable(resp.status().to_string()));
        }

        let parsed: Json = resp.json().await.map_err(|e| PspError::MalformedResponse(e.to_string()))?;
        let raw = parsed
            .get("_embedded")
            .and_then(|e| e.get("payments"))
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default();

        let mut payments = Vec::new();
        for item in raw {
            let payment = parse_payment(&item)?;
            if payment.paid_at.is_none_or(|t| t >= since) {
                payments.push(payment);
            }
        }

        Ok(payments)
    }
}

fn extract_checkout(parsed: &Json) -> Result<CheckoutPayment> {
    let payment_id = parsed
        .get("id")
        .and_then(Json::as_str)
        .ok_or_else(|| PspError::MalformedResponse("missing payment id".to_string()))?
        .to_string();

    let checkout_url = parsed
        .get("_links")
        .and_then(|l| l.get("checkout"))
        .and_then(|c| c.get("href"))
        .and_then(Json::as_str)
        .ok_or_else(|| PspError::MalformedResponse("missing checkout url".to_string()))?
        .to_string();

    Ok(CheckoutPayment { payment_id, checkout_url })
}

fn parse_payment(parsed: &Json) -> Result<PaymentObject> {
    let payment_id = parsed
        .get("id")
        .and_then(Json::as_str)
        .ok_or_else(|| PspError::MalformedResponse("missing payment id".to_string()))?
        .to_string();

    let status_str = parsed
        .get("status")
        .and_then(Json::as_str)
        .ok_or_else(|| PspError::MalformedResponse("missing status".to_string()))?;

    let status = match status_str {
        "open" => PaymentStatus::Open,
        "pending" => PaymentStatus::Pending,
        "paid" => PaymentStatus::Paid,
        "failed" => PaymentStatus::Failed,
        "canceled" => PaymentStatus::Canceled,
        "expired" => PaymentStatus::Expired,
        "refunded" => PaymentStatus::Refunded,
        "charged_back" => PaymentStatus::ChargedBack,
        other => return Err(PspError::MalformedResponse(format!("unknown status {other}"))),
    };

    let amount_cents = parsed
        .get("amount")
        .and_then(|a| a.get("value"))
        .and_then(Json::as_str)
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| (v * 100.0).round() as i64)
        .unwrap_or(0);

    let currency = parsed
        .get("amount")
        .and_then(|a| a.get("currency"))
        .and_then(Json::as_str)
        .unwrap_or("EUR")
        .to_string();

    let subscription_id = parsed.get("subscriptionId").and_then(Json::as_str).map(str::to_string);
    let customer_id = parsed.get("customerId").and_then(Json::as_str).map(str::to_string);
    let mandate_id = parsed.get("mandateId").and_then(Json::as_str).map(str::to_string);
    let metadata = parsed.get("metadata").cloned().unwrap_or(Json::Null);
    let paid_at = parsed
        .get("paidAt")
        .and_then(Json::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&chrono::Utc));

    Ok(PaymentObject {
        payment_id,
        status,
        amount_cents,
        currency,
        subscription_id,
        customer_id,
        mandate_id,
        metadata,
        paid_at,
    })
}
