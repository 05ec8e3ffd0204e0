use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::ok;
use crate::auth::Principal;
use crate::error::AppError;
use crate::pricing::promo::{self, PromoDecision};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/promo-codes/validate", post(validate))
}

#[derive(Deserialize)]
struct ValidateRequest {
    code: String,
    order_amount: f64,
}

/// Dry run of the promo validator; nothing is committed.
async fn validate(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<Value>, AppError> {
    let decision = match state.store.promo_codes.get(&payload.code) {
        Some(row) => {
            let ctx = promo::PromoContext {
                has_prior_usage: state
                    .store
                    .has_promo_usage(principal.user_id, &payload.code),
                user_has_delivered_order: state
                    .store
                    .user_has_delivered_order(principal.user_id),
            };
            promo::evaluate(row.value(), payload.order_amount, &ctx, Utc::now())
        }
        None => PromoDecision::invalid("unknown code"),
    };

    let valid = matches!(decision, PromoDecision::Valid { .. });
    Ok(ok(
        "promo",
        json!({
            "code": payload.code,
            "valid": valid,
            "decision": decision,
        }),
    ))
}
