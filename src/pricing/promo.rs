use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::promo::{DiscountType, PromoCode};
use crate::pricing::money;

/// Facts about the caller the validator needs but cannot look up itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromoContext {
    pub has_prior_usage: bool,
    pub user_has_delivered_order: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PromoDecision {
    Valid { discount: f64 },
    Invalid { reason: String },
}

impl PromoDecision {
    pub fn discount(&self) -> f64 {
        match self {
            PromoDecision::Valid { discount } => *discount,
            PromoDecision::Invalid { .. } => 0.0,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        PromoDecision::Invalid {
            reason: reason.into(),
        }
    }
}

/// All rules must hold; the first violated rule names the reason.
pub fn evaluate(
    promo: &PromoCode,
    order_amount: f64,
    ctx: &PromoContext,
    now: DateTime<Utc>,
) -> PromoDecision {
    if !promo.is_active {
        return PromoDecision::invalid("code is not active");
    }
    if now < promo.valid_from || now > promo.valid_until {
        return PromoDecision::invalid("code is outside its validity window");
    }
    if let Some(limit) = promo.usage_limit {
        if promo.current_usage >= limit {
            return PromoDecision::invalid("code usage limit reached");
        }
    }
    if order_amount < promo.minimum_order_amount {
        return PromoDecision::invalid(format!(
            "order amount below minimum of {:.2}",
            promo.minimum_order_amount
        ));
    }
    if promo.is_one_time && ctx.has_prior_usage {
        return PromoDecision::invalid("code already used");
    }
    if promo.is_first_time_user && ctx.user_has_delivered_order {
        return PromoDecision::invalid("code is for first-time users only");
    }

    let discount = match promo.discount_type {
        DiscountType::Percentage => {
            let raw = order_amount * promo.discount_value / 100.0;
            match promo.maximum_discount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::FixedAmount => promo.discount_value.min(order_amount),
    };

    PromoDecision::Valid {
        discount: money::round2(discount),
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, PromoContext, PromoDecision};
    use crate::models::promo::{DiscountType, PromoCode};
    use chrono::{Duration, Utc};

    fn welcome20() -> PromoCode {
        PromoCode {
            code: "WELCOME20".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 20.0,
            minimum_order_amount: 0.0,
            maximum_discount: Some(15.0),
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(30),
            is_one_time: true,
            is_first_time_user: true,
            usage_limit: None,
            current_usage: 0,
            is_active: true,
        }
    }

    #[test]
    fn percentage_discount_respects_the_cap() {
        let decision = evaluate(&welcome20(), 50.0, &PromoContext::default(), Utc::now());
        match decision {
            PromoDecision::Valid { discount } => assert_eq!(discount, 10.0),
            PromoDecision::Invalid { reason } => panic!("unexpected: {reason}"),
        }

        let decision = evaluate(&welcome20(), 200.0, &PromoContext::default(), Utc::now());
        assert_eq!(decision.discount(), 15.0, "20% of 200 capped at 15");
    }

    #[test]
    fn fixed_discount_never_exceeds_the_order() {
        let mut promo = welcome20();
        promo.discount_type = DiscountType::FixedAmount;
        promo.discount_value = 25.0;

        let decision = evaluate(&promo, 10.0, &PromoContext::default(), Utc::now());
        assert_eq!(decision.discount(), 10.0);
    }

    #[test]
    fn one_time_code_rejects_reuse() {
        let ctx = PromoContext {
            has_prior_usage: true,
            user_has_delivered_order: false,
        };
        match evaluate(&welcome20(), 50.0, &ctx, Utc::now()) {
            PromoDecision::Invalid { reason } => assert!(reason.contains("already used")),
            PromoDecision::Valid { .. } => panic!("reuse should be rejected"),
        }
    }

    #[test]
    fn first_time_code_rejects_existing_customers() {
        let ctx = PromoContext {
            has_prior_usage: false,
            user_has_delivered_order: true,
        };
        match evaluate(&welcome20(), 50.0, &ctx, Utc::now()) {
            PromoDecision::Invalid { reason } => assert!(reason.contains("first-time")),
            PromoDecision::Valid { .. } => panic!("existing customer should be rejected"),
        }
    }

    #[test]
    fn expired_and_exhausted_codes_are_invalid() {
        let mut expired = welcome20();
        expired.valid_until = Utc::now() - Duration::days(1);
        assert!(matches!(
            evaluate(&expired, 50.0, &PromoContext::default(), Utc::now()),
            PromoDecision::Invalid { .. }
        ));

        let mut exhausted = welcome20();
        exhausted.usage_limit = Some(10);
        exhausted.current_usage = 10;
        assert!(matches!(
            evaluate(&exhausted, 50.0, &PromoContext::default(), Utc::now()),
            PromoDecision::Invalid { .. }
        ));
    }

    #[test]
    fn minimum_order_enforced() {
        let mut promo = welcome20();
        promo.minimum_order_amount = 30.0;
        assert!(matches!(
            evaluate(&promo, 29.99, &PromoContext::default(), Utc::now()),
            PromoDecision::Invalid { .. }
        ));
    }
}
