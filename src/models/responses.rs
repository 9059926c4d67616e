use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ApiResponse<'a, T: Serialize + ToSchema> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,

    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError<'a>>,

    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

impl<'a, T: Serialize + ToSchema> Default for ApiResponse<'a, T> {
    fn default() -> Self {
        Self {
            data: None,
            meta: None,
            error: None,
            message: None,
        }
    }
}

impl<'a, T: Serialize + ToSchema> ApiResponse<'a, T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }
}

/// A struct with nothing, used as a default placeholder schema.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct None {}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ResponseMeta {
    pub limit: i32,
    pub total: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ApiError<'a> {
    pub code: &'a str,
    pub message: &'a str,
    pub details: &'a [ErrorDetail<'a>],

    /// Structured, error-kind-specific payload (§7: "insufficient credits
    /// returns HTTP 402 with required/balance/available; email mismatch
    /// returns 403 with the canonical identity email"). Flattened into the
    /// same JSON object as `code`/`message` rather than nested, so a client
    /// reads `error.required` directly.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ErrorDetail<'a> {
    pub field: &'a str,
    pub message: &'a str,
}

/// The closed set of error-kind-specific detail payloads the core's
/// `ResponseError` impls attach. Kept as an enum of flattened variants
/// rather than a generic JSON blob so every documented code in §7 has a
/// fixed, `ToSchema`-visible shape.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ErrorPayload {
    InsufficientCredits {
        required: i64,
        balance: i64,
        reserved: i64,
        available: i64,
        class: crate::pricing::CreditClass,
    },
    EmailMismatch {
        identity_email: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::CreditClass;

    #[test]
    fn insufficient_credits_detail_flattens_into_the_error_object() {
        let error = ApiError {
            code: "INSUFFICIENT_CREDITS",
            message: "insufficient credits",
            details: &[],
            detail: Some(ErrorPayload::InsufficientCredits {
                required: 10,
                balance: 4,
                reserved: 0,
                available: 4,
                class: CreditClass::General,
            }),
        };

        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["code"], "INSUFFICIENT_CREDITS");
        assert_eq!(value["required"], 10);
        assert_eq!(value["available"], 4);
        assert!(value.get("detail").is_none(), "detail must flatten, not nest");
    }

    #[test]
    fn no_detail_omits_the_field_entirely() {
        let error = ApiError { code: "NOT_FOUND", message: "gone", details: &[], detail: None };
        let value = serde_json::to_value(&error).unwrap();
        assert!(value.get("required").is_none());
    }
}
