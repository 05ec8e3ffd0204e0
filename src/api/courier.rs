use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::ok;
use crate::auth::Principal;
use crate::engine::dispatch;
use crate::engine::ingest::{self, IngestOutcome, SampleInput};
use crate::engine::lifecycle::{self, Actor, ProofUpload, TransitionRequest};
use crate::error::AppError;
use crate::models::courier::GeoPoint;
use crate::models::delivery::DeliveryStatus;
use crate::pricing::money;
use crate::state::AppState;
use crate::store::setting_keys;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courier/accept-delivery/:id", post(accept_delivery))
        .route("/courier/delivery-status/:id", put(update_status))
        .route("/courier/availability", put(availability))
        .route("/courier/location", post(location))
        .route("/courier/delivery-requests", get(delivery_requests))
        .route("/courier/active-delivery", get(active_delivery))
        .route("/courier/earnings", get(earnings))
}

/// The claim. Winner gets the full pickup address and the verification
/// code; losers get 409 `already_assigned`.
async fn accept_delivery(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;
    state.store.courier_profile(principal.user_id);

    let delivery = lifecycle::claim(&state, id, principal.user_id).await?;

    Ok(ok(
        "delivery",
        json!({
            "delivery": delivery,
            "verification_code": delivery.verification_code,
            "pickup_address": delivery.pickup,
            "dropoff_address": delivery.dropoff,
        }),
    ))
}

#[derive(Deserialize)]
struct UpdateStatusRequest {
    status: DeliveryStatus,
    #[serde(default)]
    location: Option<GeoPoint>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    delivery_proof: Option<ProofUpload>,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;

    let request = TransitionRequest {
        location: payload.location,
        notes: payload.notes,
        reason: payload.reason,
        proof: payload.delivery_proof,
    };
    let delivery = lifecycle::apply_transition(
        &state,
        id,
        Actor::Courier(principal.user_id),
        payload.status,
        request,
    )
    .await?;

    Ok(ok("delivery", json!(delivery)))
}

#[derive(Deserialize)]
struct AvailabilityRequest {
    is_available: bool,
    #[serde(default)]
    location: Option<GeoPoint>,
}

async fn availability(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;

    if let Some(location) = &payload.location {
        if !location.is_valid() {
            return Err(AppError::Validation("invalid coordinates".to_string()));
        }
    }

    state.store.courier_profile(principal.user_id);
    let profile = {
        let mut entry = state
            .store
            .couriers
            .get_mut(&principal.user_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {}", principal.user_id)))?;
        entry.is_available = payload.is_available;
        if let Some(location) = payload.location {
            entry.location = Some(location);
            entry.location_updated_at = Some(Utc::now());
        }
        entry.updated_at = Utc::now();
        entry.value().clone()
    };

    Ok(ok("courier", json!(profile)))
}

async fn location(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<SampleInput>,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;

    match ingest::ingest(&state, principal.user_id, payload).await? {
        IngestOutcome::Applied(sample) => Ok(Json(json!({
            "success": true,
            "accepted": true,
            "sample": sample,
        }))),
        IngestOutcome::Discarded => Ok(Json(json!({
            "success": true,
            "accepted": false,
        }))),
    }
}

/// Pull view of the same offers the dispatcher pushes.
async fn delivery_requests(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;
    let profile = state.store.courier_profile(principal.user_id);

    let commission = state
        .store
        .setting_f64(setting_keys::COURIER_COMMISSION_RATE, 0.8);
    let min_rating = state
        .store
        .setting_f64(setting_keys::MIN_COURIER_RATING, 0.0);

    let offers: Vec<Value> = state
        .store
        .searching_deliveries()
        .into_iter()
        .filter(|d| dispatch::eligible(&profile, d, min_rating))
        .map(|d| {
            let amount = state
                .store
                .get_payment(d.id)
                .map(|p| p.amount)
                .unwrap_or(0.0);
            let expires_at = Utc::now() + Duration::minutes(15);
            dispatch::build_offer(&d, &profile, amount, commission, expires_at)
        })
        .collect();

    Ok(ok("delivery_requests", json!(offers)))
}

/// Expanded view for the courier working the delivery, verification code
/// included.
async fn active_delivery(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;
    let profile = state.store.courier_profile(principal.user_id);

    let Some(delivery_id) = profile.active_delivery_id else {
        return Ok(ok("delivery", Value::Null));
    };

    let delivery = state.store.get_delivery(delivery_id)?;
    let events = state.store.events_for(delivery_id);
    Ok(ok(
        "delivery",
        json!({
            "delivery": delivery,
            "events": events,
            "verification_code": delivery.verification_code,
        }),
    ))
}

#[derive(Deserialize)]
struct EarningsQuery {
    #[serde(default)]
    period: Option<String>,
}

async fn earnings(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<Value>, AppError> {
    principal.require_courier()?;
    let profile = state.store.courier_profile(principal.user_id);

    let period = query.period.as_deref().unwrap_or("all");
    let since = match period {
        "day" => Some(Utc::now() - Duration::days(1)),
        "week" => Some(Utc::now() - Duration::weeks(1)),
        "month" => Some(Utc::now() - Duration::days(30)),
        "all" => None,
        other => {
            return Err(AppError::Validation(format!(
                "unknown period {other:?}; expected day, week, month or all"
            )))
        }
    };

    let commission = state
        .store
        .setting_f64(setting_keys::COURIER_COMMISSION_RATE, 0.8);

    let mut period_total = 0.0;
    let mut completed = 0u32;
    let mut daily: std::collections::BTreeMap<NaiveDate, (f64, u32)> =
        std::collections::BTreeMap::new();

    for entry in state.store.deliveries.iter() {
        let delivery = entry.value();
        if delivery.courier_id != Some(principal.user_id)
            || delivery.status != DeliveryStatus::Delivered
        {
            continue;
        }
        let Some(delivered_at) = delivery.actual_delivery_time else {
            continue;
        };
        if let Some(since) = since {
            if delivered_at < since {
                continue;
            }
        }
        let Ok(payment) = state.store.get_payment(delivery.id) else {
            continue;
        };

        let earning = money::round2(payment.amount * commission + payment.tip);
        period_total += earning;
        completed += 1;
        let day = delivered_at.date_naive();
        let slot = daily.entry(day).or_insert((0.0, 0));
        slot.0 = money::round2(slot.0 + earning);
        slot.1 += 1;
    }

    let daily: Vec<Value> = daily
        .into_iter()
        .rev()
        .map(|(date, (amount, count))| json!({ "date": date, "amount": amount, "count": count }))
        .collect();

    Ok(ok(
        "earnings",
        json!({
            "balance": profile.account_balance,
            "period": period,
            "period_earnings": money::round2(period_total),
            "completed_deliveries": completed,
            "daily": daily,
            "recent_payouts": state.store.payouts_for(principal.user_id),
        }),
    ))
}
