//! The pricing catalog (§4.C). A static, compiled-in table with two
//! surfaces — `normalise` and `cost`/`class_of`/`plan_grant` — kept as a
//! process-wide read-mostly map via `once_cell::sync::Lazy`, the same
//! pattern `auth::AuthSessions` uses for its `DashMap`. Catalog mutation is
//! restart-only by design.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PricingError {
    #[error("unknown action key: {0}")]
    UnknownAction(String),
    #[error("unknown plan code: {0}")]
    UnknownPlan(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "credit_class", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditClass {
    General,
    Video,
}

#[derive(Debug, Clone, Copy)]
pub struct ActionPricing {
    pub cost: i64,
    pub class: CreditClass,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanGrant {
    pub credits: i64,
    pub class: CreditClass,
}

/// One-time purchase plan codes, their credit grant, and credit class.
static PLAN_CATALOG: Lazy<HashMap<&'static str, PlanGrant>> = Lazy::new(|| {
    use CreditClass::*;
    HashMap::from([
        ("starter_250", PlanGrant { credits: 250, class: General }),
        ("creator_900", PlanGrant { credits: 900, class: General }),
        ("studio_2200", PlanGrant { credits: 2200, class: General }),
        ("video_starter_300", PlanGrant { credits: 300, class: Video }),
        ("video_creator_900", PlanGrant { credits: 900, class: Video }),
        ("video_studio_2000", PlanGrant { credits: 2000, class: Video }),
    ])
});

/// Subscription plan codes: monthly credits-per-cycle and billing cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingCadence {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy)]
pub struct SubscriptionPlan {
    pub credits_per_month: i64,
    pub class: CreditClass,
    pub cadence: BillingCadence,
}

static SUBSCRIPTION_PLAN_CATALOG: Lazy<HashMap<&'static str, SubscriptionPlan>> = Lazy::new(|| {
    HashMap::from([
        (
            "creator_monthly",
            SubscriptionPlan {
                credits_per_month: 900,
                class: CreditClass::General,
                cadence: BillingCadence::Monthly,
            },
        ),
        (
            "creator_yearly",
            SubscriptionPlan {
                credits_per_month: 900,
                class: CreditClass::General,
                cadence: BillingCadence::Yearly,
            },
        ),
    ])
});

/// Non-canonical spellings seen at call sites, collapsed to a canonical key.
/// Grounded in `ALIAS_TO_CANONICAL`.
static ALIAS_TO_CANONICAL: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("image_studio_generate", "image_generate"),
        ("openai-image", "image_generate"),
        ("text-to-image", "image_generate"),
        ("image-studio", "image_generate"),
        ("nano-image", "image_generate"),
        ("image-2k", "image_generate_2k"),
        ("image-4k", "image_generate_4k"),
        ("preview", "text_to_3d_generate"),
        ("text-to-3d", "text_to_3d_generate"),
        ("text-to-3d-preview", "text_to_3d_generate"),
        ("image-to-3d", "image_to_3d_generate"),
        ("text-to-3d-refine", "refine"),
        ("upscale", "refine"),
        ("text-to-3d-remesh", "remesh"),
        ("texture", "retexture"),
        ("video", "video_generate"),
        ("video-generate", "video_generate"),
        ("text2video", "video_text_generate"),
        ("video-text-generate", "video_text_generate"),
        ("image2video", "video_image_animate"),
        ("video-image-animate", "video_image_animate"),
    ])
});

/// Canonical, non-variant action costs. Video variant codes
/// (`video_{task}_{duration}s_{resolution}`) are resolved separately by
/// [`video_variant_cost`].
static ACTION_CATALOG: Lazy<HashMap<&'static str, ActionPricing>> = Lazy::new(|| {
    use CreditClass::*;
    HashMap::from([
        ("image_generate", ActionPricing { cost: 5, class: General }),
        ("image_generate_2k", ActionPricing { cost: 7, class: General }),
        ("image_generate_4k", ActionPricing { cost: 10, class: General }),
        ("text_to_3d_generate", ActionPricing { cost: 20, class: General }),
        ("image_to_3d_generate", ActionPricing { cost: 30, class: General }),
        ("refine", ActionPricing { cost: 8, class: General }),
        ("remesh", ActionPricing { cost: 8, class: General }),
        ("retexture", ActionPricing { cost: 12, class: General }),
        ("video_generate", ActionPricing { cost: 70, class: Video }),
        ("video_text_generate", ActionPricing { cost: 70, class: Video }),
        ("video_image_animate", ActionPricing { cost: 70, class: Video }),
        ("gemini_video", ActionPricing { cost: 80, class: Video }),
    ])
});

const VIDEO_VARIANT_PREFIXES: [&str; 2] = ["video_text_generate_", "video_image_animate_"];

/// Normalise any spelling of an action key to its canonical form. Lowercases
/// and maps `-` to `_` before a second lookup attempt. Unknown keys are
/// returned unchanged — callers must still route them through `cost`, which
/// fails closed.
pub fn normalise(action_key: &str) -> String {
    if ACTION_CATALOG.contains_key(action_key) {
        return action_key.to_string();
    }
    if let Some(canon) = ALIAS_TO_CANONICAL.get(action_key) {
        return canon.to_string();
    }

    let lowered = action_key.to_lowercase().replace('-', "_");
    if ACTION_CATALOG.contains_key(lowered.as_str()) {
        return lowered;
    }
    if let Some(canon) = ALIAS_TO_CANONICAL.get(lowered.as_str()) {
        return canon.to_string();
    }
    if is_video_variant_code(&lowered) {
        return lowered;
    }

    lowered
}

fn is_video_variant_code(action_key: &str) -> bool {
    if !action_key.starts_with("video_") {
        return false;
    }
    for prefix in VIDEO_VARIANT_PREFIXES {
        if let Some(suffix) = action_key.strip_prefix(prefix) {
            return matches!(
                suffix,
                "4s_720p" | "6s_720p" | "8s_720p" | "8s_1080p" | "8s_4k"
            );
        }
    }
    false
}

/// Resolves the credit cost for a video variant suffix (e.g. `8s_1080p`).
fn video_variant_cost(suffix: &str) -> Option<i64> {
    Some(match suffix {
        "4s_720p" => 70,
        "6s_720p" => 90,
        "8s_720p" => 110,
        "8s_1080p" => 130,
        "8s_4k" => 160,
        _ => return None,
    })
}

/// Cost in credits for a canonical action key. Fails closed on unknown
/// actions rather than defaulting to a "general" class.
pub fn cost(canonical_key: &str) -> Result<i64, PricingError> {
    if let Some(pricing) = ACTION_CATALOG.get(canonical_key) {
        return Ok(pricing.cost);
    }
    for prefix in VIDEO_VARIANT_PREFIXES {
        if let Some(suffix) = canonical_key.strip_prefix(prefix) {
            if let Some(c) = video_variant_cost(suffix) {
                return Ok(c);
            }
        }
    }
    Err(PricingError::UnknownAction(canonical_key.to_string()))
}

/// Credit class for a canonical action key.
pub fn class_of(canonical_key: &str) -> Result<CreditClass, PricingError> {
    if let Some(pricing) = ACTION_CATALOG.get(canonical_key) {
        return Ok(pricing.class);
    }
    if is_video_variant_code(canonical_key) {
        return Ok(CreditClass::Video);
    }
    Err(PricingError::UnknownAction(canonical_key.to_string()))
}

/// Resolve `(canonical_key, cost, class)` in one call, the shape §4.D's
/// `reserve` needs at step 1.
pub fn resolve(action_key: &str) -> Result<(String, i64, CreditClass), PricingError> {
    let canonical = normalise(action_key);
    let cost = cost(&canonical)?;
    let class = class_of(&canonical)?;
    Ok((canonical, cost, class))
}

/// One-time purchase plan grant, fails closed on unknown plan codes.
pub fn plan_grant(plan_code: &str) -> Result<PlanGrant, PricingError> {
    PLAN_CATALOG
        .get(plan_code)
        .copied()
        .ok_or_else(|| PricingError::UnknownPlan(plan_code.to_string()))
}

/// Subscription plan lookup, fails closed on unknown plan codes.
pub fn subscription_plan(plan_code: &str) -> Result<SubscriptionPlan, PricingError> {
    SUBSCRIPTION_PLAN_CATALOG
        .get(plan_code)
        .copied()
        .ok_or_else(|| PricingError::UnknownPlan(plan_code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_normalise_to_canonical() {
        assert_eq!(normalise("openai-image"), "image_generate");
        assert_eq!(normalise("text-to-3d-preview"), "text_to_3d_generate");
        assert_eq!(normalise("image_generate"), "image_generate");
    }

    #[test]
    fn video_variant_codes_are_canonical_verbatim() {
        assert_eq!(
            normalise("video_image_animate_8s_1080p"),
            "video_image_animate_8s_1080p"
        );
        assert_eq!(cost("video_image_animate_8s_1080p").unwrap(), 130);
        assert_eq!(
            class_of("video_image_animate_8s_1080p").unwrap(),
            CreditClass::Video
        );
    }

    #[test]
    fn unknown_action_fails_closed() {
        assert!(cost("not_a_real_action").is_err());
        assert!(class_of("not_a_real_action").is_err());
    }

    #[test]
    fn every_cost_table_key_has_a_class() {
        for key in ACTION_CATALOG.keys() {
            assert!(class_of(key).is_ok(), "missing class for {key}");
        }
    }

    #[test]
    fn unknown_plan_fails_closed() {
        assert!(plan_grant("not_a_plan").is_err());
        assert!(subscription_plan("not_a_plan").is_err());
    }

    #[test]
    fn resolve_returns_canonical_cost_and_class() {
        let (canonical, cost, class) = resolve("upscale").unwrap();
        assert_eq!(canonical, "refine");
        assert_eq!(cost, 8);
        assert_eq!(class, CreditClass::General);
    }
}
