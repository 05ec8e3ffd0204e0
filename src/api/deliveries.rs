use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::ok;
use crate::auth::{self, Principal, Role};
use crate::engine::lifecycle::{self, Actor, NewDelivery, TransitionRequest};
use crate::error::AppError;
use crate::events::notify;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{
    Address, Delivery, DeliveryStatus, Priority, RecipientContact,
};
use crate::models::notification::NotificationType;
use crate::models::rating::{DeliveryIssue, IssueStatus, Rating};
use crate::pricing::{self, promo};
use crate::state::AppState;
use crate::tracking;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries/estimate", post(estimate))
        .route("/deliveries", post(create).get(list))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/cancel", put(cancel))
        .route("/deliveries/:id/tip", post(tip))
        .route("/deliveries/:id/rate", post(rate))
        .route("/deliveries/:id/report-issue", post(report_issue))
        .route("/deliveries/:id/receipt", get(receipt))
}

/// Bearer auth when the header is present; `None` lets tracking-token
/// flows through. A present-but-invalid token is still an error.
fn principal_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Principal>, AppError> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Auth("malformed authorization header".to_string()))?;
    auth::verify_token(&state.jwt_secret, token).map(Some)
}

#[derive(Deserialize)]
struct EstimateRequest {
    pickup: GeoPoint,
    dropoff: GeoPoint,
    package_type_id: Uuid,
    #[serde(default)]
    weight: f64,
    #[serde(default = "default_priority")]
    priority: Priority,
    #[serde(default)]
    promo_code: Option<String>,
}

fn default_priority() -> Priority {
    Priority::Standard
}

/// Pure dry run; produces exactly the numbers `POST /deliveries` would
/// charge for the same inputs.
async fn estimate(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<EstimateRequest>,
) -> Result<Json<Value>, AppError> {
    if !payload.pickup.is_valid() || !payload.dropoff.is_valid() {
        return Err(AppError::Validation("invalid coordinates".to_string()));
    }

    let package_type = state.store.get_package_type(payload.package_type_id)?;
    let settings = lifecycle::pricing_settings(&state);
    let quote = pricing::quote(
        &payload.pickup,
        &payload.dropoff,
        &package_type,
        payload.weight,
        payload.priority,
        &settings,
    );

    let promo_result = payload.promo_code.as_deref().map(|code| {
        match state.store.promo_codes.get(code) {
            Some(row) => {
                let ctx = promo::PromoContext {
                    has_prior_usage: state.store.has_promo_usage(principal.user_id, code),
                    user_has_delivered_order: state
                        .store
                        .user_has_delivered_order(principal.user_id),
                };
                promo::evaluate(row.value(), quote.subtotal(), &ctx, Utc::now())
            }
            None => promo::PromoDecision::invalid("unknown code"),
        }
    });

    let discount = promo_result.as_ref().map(|d| d.discount()).unwrap_or(0.0);
    let total = pricing::money::round2(quote.subtotal() - discount);

    Ok(ok(
        "estimate",
        json!({
            "base_fee": quote.base_fee,
            "distance_fee": quote.distance_fee,
            "weight_fee": quote.weight_fee,
            "priority_fee": quote.priority_fee,
            "tax": quote.tax,
            "discount": discount,
            "total": total,
            "distance_miles": quote.distance_miles,
            "estimated_duration_minutes": quote.estimated_duration_minutes,
            "promo": promo_result,
        }),
    ))
}

#[derive(Deserialize)]
struct CreateDeliveryRequest {
    pickup: Address,
    dropoff: Address,
    package_type_id: Uuid,
    #[serde(default)]
    weight: f64,
    #[serde(default = "default_priority")]
    priority: Priority,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_fragile: bool,
    #[serde(default)]
    requires_signature: bool,
    #[serde(default)]
    requires_id_verification: bool,
    #[serde(default)]
    requires_photo_proof: bool,
    recipient: RecipientContact,
    #[serde(default)]
    scheduled_pickup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    special_instructions: Option<String>,
    #[serde(default)]
    package_photo_url: Option<String>,
    payment_method: String,
    #[serde(default)]
    promo_code: Option<String>,
}

async fn create(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Value>, AppError> {
    principal.require_sender()?;

    let created = lifecycle::create_delivery(
        &state,
        principal.user_id,
        NewDelivery {
            pickup: payload.pickup,
            dropoff: payload.dropoff,
            package_type_id: payload.package_type_id,
            weight: payload.weight,
            priority: payload.priority,
            description: payload.description,
            is_fragile: payload.is_fragile,
            requires_signature: payload.requires_signature,
            requires_id_verification: payload.requires_id_verification,
            requires_photo_proof: payload.requires_photo_proof,
            recipient: payload.recipient,
            scheduled_pickup_time: payload.scheduled_pickup_time,
            special_instructions: payload.special_instructions,
            package_photo_url: payload.package_photo_url,
            payment_method: payload.payment_method,
            promo_code: payload.promo_code,
        },
    )
    .await?;

    Ok(ok(
        "delivery",
        json!({
            "delivery": created.delivery,
            "payment": created.payment,
            "tracking_urls": {
                "recipient": created.recipient_tracking_url,
                "sender": created.sender_tracking_url,
            },
        }),
    ))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<DeliveryStatus>,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    20
}

/// Scoped automatically: senders see what they sent, couriers what they
/// carry.
async fn list(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let as_courier = principal.role == Role::Courier;
    let rows = state.store.deliveries_for_user(
        principal.user_id,
        as_courier,
        query.status,
        query.from,
        query.to,
    );

    let total = rows.len();
    let per_page = query.per_page.clamp(1, 100);
    let page = query.page.max(1);
    let page_rows: Vec<&Delivery> = rows
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(Json(json!({
        "success": true,
        "deliveries": page_rows,
        "pagination": { "page": page, "per_page": per_page, "total": total },
    })))
}

#[derive(Deserialize)]
struct TrackingQuery {
    #[serde(default)]
    tracking_token: Option<String>,
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<TrackingQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let delivery = state.store.get_delivery(id)?;
    let events = state.store.events_for(id);

    if let Some(principal) = principal_from_headers(&state, &headers)? {
        let is_sender = delivery.sender_id == principal.user_id;
        let is_courier = delivery.courier_id == Some(principal.user_id);
        if !is_sender && !is_courier {
            return Err(AppError::Forbidden(
                "not a participant of this delivery".to_string(),
            ));
        }

        let payment = state.store.get_payment(id).ok();
        let mut body = json!({ "delivery": delivery, "events": events });
        if is_sender {
            body["payment"] = json!(payment);
        }
        return Ok(ok("delivery", body));
    }

    let token_str = query
        .tracking_token
        .ok_or_else(|| AppError::Auth("missing bearer token or tracking token".to_string()))?;
    let token = tracking::validate(&state.store, &token_str)?;
    if token.delivery_id != id {
        return Err(AppError::Forbidden(
            "token is bound to another delivery".to_string(),
        ));
    }

    Ok(ok(
        "delivery",
        json!({ "delivery": tracking_view(&delivery), "events": events }),
    ))
}

/// Read-only projection for tracking links: no verification code, no
/// door/access notes.
fn tracking_view(delivery: &Delivery) -> Value {
    let mut value = json!(delivery);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("verification_code");
        for key in ["pickup", "dropoff"] {
            if let Some(address) = obj.get_mut(key).and_then(Value::as_object_mut) {
                address.remove("access_notes");
            }
        }
    }
    value
}

#[derive(Deserialize)]
struct CancelRequest {
    reason: String,
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Value>, AppError> {
    principal.require_sender()?;

    let request = TransitionRequest {
        reason: Some(payload.reason),
        ..TransitionRequest::default()
    };
    let delivery = lifecycle::apply_transition(
        &state,
        id,
        Actor::Sender(principal.user_id),
        DeliveryStatus::Cancelled,
        request,
    )
    .await?;

    let payment = state.store.get_payment(id).ok();
    let refund_amount = payment.as_ref().map(|p| p.refund_amount).unwrap_or(0.0);

    Ok(ok(
        "delivery",
        json!({
            "delivery": delivery,
            "refund_amount": refund_amount,
            "payment": payment,
        }),
    ))
}

#[derive(Deserialize)]
struct TipRequest {
    amount: f64,
}

async fn tip(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<TipRequest>,
) -> Result<Json<Value>, AppError> {
    principal.require_sender()?;
    let payment = lifecycle::add_tip(&state, id, principal.user_id, payload.amount).await?;
    Ok(ok("payment", json!(payment)))
}

#[derive(Deserialize)]
struct RateRequest {
    overall: u8,
    #[serde(default)]
    timeliness: Option<u8>,
    #[serde(default)]
    communication: Option<u8>,
    #[serde(default)]
    handling: Option<u8>,
    #[serde(default)]
    comment: Option<String>,
}

async fn rate(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<Value>, AppError> {
    let delivery = state.store.get_delivery(id)?;
    if delivery.status != DeliveryStatus::Delivered {
        return Err(AppError::Conflict(
            "only delivered deliveries can be rated".to_string(),
        ));
    }

    for score in [
        Some(payload.overall),
        payload.timeliness,
        payload.communication,
        payload.handling,
    ]
    .into_iter()
    .flatten()
    {
        if !(1..=5).contains(&score) {
            return Err(AppError::Validation(
                "scores must be between 1 and 5".to_string(),
            ));
        }
    }

    let courier_id = delivery
        .courier_id
        .ok_or_else(|| AppError::Conflict("delivery has no courier".to_string()))?;

    let (ratee_id, is_courier_ratee, rating) = if principal.user_id == delivery.sender_id {
        let rating = Rating {
            id: Uuid::new_v4(),
            delivery_id: id,
            rater_id: principal.user_id,
            ratee_id: courier_id,
            overall: payload.overall,
            timeliness: payload.timeliness,
            communication: payload.communication,
            handling: payload.handling,
            comment: payload.comment,
            created_at: Utc::now(),
        };
        (courier_id, true, rating)
    } else if principal.user_id == courier_id {
        // Couriers rate senders on the overall axis only.
        let rating = Rating {
            id: Uuid::new_v4(),
            delivery_id: id,
            rater_id: principal.user_id,
            ratee_id: delivery.sender_id,
            overall: payload.overall,
            timeliness: None,
            communication: None,
            handling: None,
            comment: payload.comment,
            created_at: Utc::now(),
        };
        (delivery.sender_id, false, rating)
    } else {
        return Err(AppError::Forbidden(
            "not a participant of this delivery".to_string(),
        ));
    };

    let key = (id, principal.user_id);
    if state.store.ratings.contains_key(&key) {
        return Err(AppError::Conflict(
            "you already rated this delivery".to_string(),
        ));
    }
    state.store.ratings.insert(key, rating.clone());

    if is_courier_ratee {
        if let Some(mut profile) = state.store.couriers.get_mut(&courier_id) {
            let received = profile.rating_count as f64;
            profile.rating = if profile.rating_count == 0 {
                f64::from(payload.overall)
            } else {
                (profile.rating * received + f64::from(payload.overall)) / (received + 1.0)
            };
            profile.rating_count += 1;
            profile.updated_at = Utc::now();
        }
    }

    notify::push(
        &state.store,
        &state.bus,
        ratee_id,
        NotificationType::Rating,
        "New rating",
        format!("You received a {}-star rating.", payload.overall),
        Some(id),
        None,
    );

    Ok(ok("rating", json!(rating)))
}

#[derive(Deserialize)]
struct ReportIssueRequest {
    #[serde(default)]
    category: Option<String>,
    description: String,
}

async fn report_issue(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportIssueRequest>,
) -> Result<Json<Value>, AppError> {
    if payload.description.trim().is_empty() {
        return Err(AppError::Validation("a description is required".to_string()));
    }

    let delivery = state.store.get_delivery(id)?;
    let counterpart = if principal.user_id == delivery.sender_id {
        delivery.courier_id
    } else if delivery.courier_id == Some(principal.user_id) {
        Some(delivery.sender_id)
    } else {
        return Err(AppError::Forbidden(
            "not a participant of this delivery".to_string(),
        ));
    };

    let issue = DeliveryIssue {
        id: Uuid::new_v4(),
        delivery_id: id,
        reporter_id: principal.user_id,
        category: payload.category,
        description: payload.description,
        status: IssueStatus::Open,
        created_at: Utc::now(),
    };
    state.store.issues.insert(issue.id, issue.clone());

    if let Some(counterpart) = counterpart {
        notify::push(
            &state.store,
            &state.bus,
            counterpart,
            NotificationType::System,
            "Issue reported",
            "An issue was reported on one of your deliveries.",
            Some(id),
            None,
        );
    }

    Ok(ok("issue", json!(issue)))
}

/// JSON receipt for a delivered delivery; PDF rendering is an external
/// concern.
async fn receipt(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let delivery = state.store.get_delivery(id)?;
    if delivery.sender_id != principal.user_id && delivery.courier_id != Some(principal.user_id) {
        return Err(AppError::Forbidden(
            "not a participant of this delivery".to_string(),
        ));
    }
    if delivery.status != DeliveryStatus::Delivered {
        return Err(AppError::Conflict(
            "receipts exist only for delivered deliveries".to_string(),
        ));
    }

    let payment = state.store.get_payment(id)?;
    Ok(ok(
        "receipt",
        json!({
            "delivery_id": delivery.id,
            "delivered_at": delivery.actual_delivery_time,
            "distance_miles": delivery.distance_miles,
            "breakdown": payment.breakdown,
            "amount": payment.amount,
            "tip": payment.tip,
            "total": pricing::money::round2(payment.amount + payment.tip),
            "payment_method": payment.payment_method,
            "transaction_id": payment.transaction_id,
        }),
    ))
}
