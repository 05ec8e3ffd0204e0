use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::bus::{delivery_topic, user_topic};
use crate::events::notify;
use crate::models::courier::GeoPoint;
use crate::models::delivery::{
    Address, Delivery, DeliveryStatus, Priority, RecipientContact, StatusEvent,
};
use crate::models::notification::NotificationType;
use crate::models::payment::{CostBreakdown, Payment, PaymentStatus};
use crate::pricing::{self, money, promo, PricingSettings};
use crate::state::AppState;
use crate::store::setting_keys;
use crate::tracking;

/// Who is asking for a transition. The state machine admits each edge for
/// exactly one actor kind, and bound actors must match the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Sender(Uuid),
    Courier(Uuid),
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorKind {
    Sender,
    Courier,
    System,
}

impl Actor {
    fn kind(&self) -> ActorKind {
        match self {
            Actor::Sender(_) => ActorKind::Sender,
            Actor::Courier(_) => ActorKind::Courier,
            Actor::System => ActorKind::System,
        }
    }

    fn id(&self) -> Option<Uuid> {
        match self {
            Actor::Sender(id) | Actor::Courier(id) => Some(*id),
            Actor::System => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProofUpload {
    pub photo_url: Option<String>,
    pub signature_url: Option<String>,
    #[serde(default)]
    pub id_verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
    pub reason: Option<String>,
    pub proof: Option<ProofUpload>,
}

/// The legal-transition table. Everything not listed here fails with
/// `InvalidTransition`, whoever asks.
fn legal(from: DeliveryStatus, to: DeliveryStatus, actor: ActorKind) -> bool {
    use ActorKind as A;
    use DeliveryStatus::*;

    matches!(
        (from, to, actor),
        (Pending, SearchingCourier, A::System)
            | (Pending, Cancelled, A::Sender)
            | (SearchingCourier, CourierAssigned, A::System)
            | (SearchingCourier, Cancelled, A::Sender)
            | (CourierAssigned, EnRouteToPickup, A::Courier)
            | (CourierAssigned, Cancelled, A::Sender)
            | (EnRouteToPickup, Cancelled, A::Sender)
            | (EnRouteToPickup, ApproachingPickup, A::System)
            | (EnRouteToPickup, AtPickup, A::Courier)
            | (ApproachingPickup, AtPickup, A::Courier)
            | (AtPickup, PickedUp, A::Courier)
            | (AtPickup, Failed, A::Courier)
            | (PickedUp, InTransit, A::Courier)
            | (InTransit, ApproachingDropoff, A::System)
            | (InTransit, AtDropoff, A::Courier)
            | (ApproachingDropoff, AtDropoff, A::Courier)
            | (AtDropoff, Delivered, A::Courier)
            | (AtDropoff, Failed | Returned, A::Courier)
            | (PickedUp | InTransit | ApproachingDropoff, Failed | Returned, A::Courier)
    )
}

/// Refund due when the sender cancels, computed from the status the
/// delivery is leaving. Post-pickup cancellation is not reachable here;
/// the transition table already refuses it.
pub fn cancellation_refund(status: DeliveryStatus, authorized_amount: f64) -> f64 {
    match status {
        DeliveryStatus::Pending | DeliveryStatus::SearchingCourier => authorized_amount,
        DeliveryStatus::CourierAssigned | DeliveryStatus::EnRouteToPickup => {
            let fee = (authorized_amount * 0.15).min(5.0);
            money::round2(authorized_amount - fee)
        }
        _ => 0.0,
    }
}

pub fn pricing_settings(state: &AppState) -> PricingSettings {
    PricingSettings {
        base_price_multiplier: state
            .store
            .setting_f64(setting_keys::BASE_PRICE_MULTIPLIER, 1.0),
        urgent_price_multiplier: state
            .store
            .setting_f64(setting_keys::URGENT_PRICE_MULTIPLIER, 1.5),
        express_price_multiplier: state
            .store
            .setting_f64(setting_keys::EXPRESS_PRICE_MULTIPLIER, 1.25),
        tax_rate: state.store.setting_f64(setting_keys::TAX_RATE, 0.0875),
    }
}

fn commission_rate(state: &AppState) -> f64 {
    state
        .store
        .setting_f64(setting_keys::COURIER_COMMISSION_RATE, 0.8)
}

pub struct NewDelivery {
    pub pickup: Address,
    pub dropoff: Address,
    pub package_type_id: Uuid,
    pub weight: f64,
    pub priority: Priority,
    pub description: Option<String>,
    pub is_fragile: bool,
    pub requires_signature: bool,
    pub requires_id_verification: bool,
    pub requires_photo_proof: bool,
    pub recipient: RecipientContact,
    pub scheduled_pickup_time: Option<DateTime<Utc>>,
    pub special_instructions: Option<String>,
    pub package_photo_url: Option<String>,
    pub payment_method: String,
    pub promo_code: Option<String>,
}

pub struct CreatedDelivery {
    pub delivery: Delivery,
    pub payment: Payment,
    pub recipient_tracking_url: String,
    pub sender_tracking_url: String,
}

/// Creates the delivery in `pending`, authorizes payment (applying any
/// promo in the same critical section), moves it to `searching_courier`
/// and hands it to the dispatcher.
pub async fn create_delivery(
    state: &Arc<AppState>,
    sender_id: Uuid,
    new: NewDelivery,
) -> Result<CreatedDelivery, AppError> {
    if !new.pickup.location.is_valid() || !new.dropoff.location.is_valid() {
        return Err(AppError::Validation("invalid coordinates".to_string()));
    }
    if !new.weight.is_finite() || new.weight < 0.0 {
        return Err(AppError::Validation("invalid package weight".to_string()));
    }
    if new.recipient.name.trim().is_empty() {
        return Err(AppError::Validation("recipient name is required".to_string()));
    }

    let package_type = state.store.get_package_type(new.package_type_id)?;
    if new.weight > package_type.max_weight {
        return Err(AppError::Validation(format!(
            "weight exceeds the {} limit of {} lb",
            package_type.name, package_type.max_weight
        )));
    }

    let settings = pricing_settings(state);
    let quote = pricing::quote(
        &new.pickup.location,
        &new.dropoff.location,
        &package_type,
        new.weight,
        new.priority,
        &settings,
    );

    let max_distance = state
        .store
        .setting_f64(setting_keys::MAX_DELIVERY_DISTANCE, 50.0);
    if quote.distance_miles > max_distance {
        return Err(AppError::Validation(format!(
            "distance of {:.1} mi exceeds the {max_distance:.0} mi service limit",
            quote.distance_miles
        )));
    }

    let order_amount = quote.subtotal();
    let discount = match &new.promo_code {
        Some(code) => {
            let promo_row = state
                .store
                .promo_codes
                .get(code)
                .map(|p| p.value().clone())
                .ok_or_else(|| AppError::Validation("promo code invalid: unknown code".to_string()))?;
            let ctx = promo::PromoContext {
                has_prior_usage: state.store.has_promo_usage(sender_id, code),
                user_has_delivered_order: state.store.user_has_delivered_order(sender_id),
            };
            match promo::evaluate(&promo_row, order_amount, &ctx, Utc::now()) {
                promo::PromoDecision::Valid { discount } => discount,
                promo::PromoDecision::Invalid { reason } => {
                    return Err(AppError::Validation(format!("promo code invalid: {reason}")))
                }
            }
        }
        None => 0.0,
    };

    let delivery_id = Uuid::new_v4();
    let now = Utc::now();
    let delivery = Delivery {
        id: delivery_id,
        sender_id,
        courier_id: None,
        pickup: new.pickup,
        dropoff: new.dropoff,
        package_type_id: package_type.id,
        status: DeliveryStatus::Pending,
        current_status_since: now,
        scheduled_pickup_time: new.scheduled_pickup_time,
        actual_pickup_time: None,
        actual_delivery_time: None,
        estimated_delivery_time: Some(
            now + chrono::Duration::minutes(quote.estimated_duration_minutes + 30),
        ),
        package_description: new.description,
        package_weight: new.weight,
        is_fragile: new.is_fragile,
        requires_signature: new.requires_signature,
        requires_id_verification: new.requires_id_verification,
        requires_photo_proof: new.requires_photo_proof,
        recipient: new.recipient,
        verification_code: tracking::generate_verification_code(),
        special_instructions: new.special_instructions,
        distance_miles: quote.distance_miles,
        estimated_duration_minutes: quote.estimated_duration_minutes,
        priority: new.priority,
        cancellation_reason: None,
        package_photo_url: new.package_photo_url,
        delivery_proof_url: None,
        signature_url: None,
        id_verified_on_delivery: false,
        created_at: now,
    };

    // Everything from the first insert to the dispatcher hand-off runs
    // under the delivery's row lock; the gateway call is allowed inside
    // because payment and creation succeed or fail together.
    let lock = state.store.delivery_lock(delivery_id);
    let _guard = lock.lock().await;

    state.store.deliveries.insert(delivery_id, delivery.clone());
    state.store.append_status_event(StatusEvent {
        id: Uuid::new_v4(),
        delivery_id,
        status: DeliveryStatus::Pending,
        timestamp: now,
        location: None,
        notes: None,
        actor_id: Some(sender_id),
        is_system: false,
    });

    let breakdown = CostBreakdown {
        base_fee: quote.base_fee,
        distance_fee: quote.distance_fee,
        weight_fee: quote.weight_fee,
        priority_fee: quote.priority_fee,
        tax: quote.tax,
        discount,
    };

    let payment = state
        .payments
        .authorize(
            &state.store,
            delivery_id,
            &new.payment_method,
            breakdown,
            new.promo_code.clone(),
        )
        .await?;

    if let Some(code) = &new.promo_code {
        state.store.commit_promo_usage(code, sender_id, delivery_id)?;
    }

    let delivery = set_status_locked(
        state,
        delivery_id,
        DeliveryStatus::SearchingCourier,
        Actor::System,
        &TransitionRequest::default(),
    )?;
    state.metrics.deliveries_searching.inc();

    let (recipient_token, sender_token) = tracking::issue_pair(&state.store, delivery_id);

    if state.dispatch_tx.send(delivery_id).await.is_err() {
        warn!(delivery_id = %delivery_id, "dispatcher queue closed; delivery left in searching");
    }

    notify::push(
        &state.store,
        &state.bus,
        sender_id,
        NotificationType::StatusUpdate,
        "Looking for a courier",
        "Your delivery was created and we are finding a courier.",
        Some(delivery_id),
        Some(tracking::tracking_url(&sender_token)),
    );

    info!(delivery_id = %delivery_id, amount = payment.amount, "delivery created");

    Ok(CreatedDelivery {
        delivery,
        payment,
        recipient_tracking_url: tracking::tracking_url(&recipient_token),
        sender_tracking_url: tracking::tracking_url(&sender_token),
    })
}

/// First-accept-wins claim. The conditional write succeeds only while the
/// delivery is still searching, unassigned, and the claimant is idle.
pub async fn claim(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    courier_id: Uuid,
) -> Result<Delivery, AppError> {
    let lock = state.store.delivery_lock(delivery_id);
    let _guard = lock.lock().await;

    let delivery = state.store.get_delivery(delivery_id)?;
    if delivery.courier_id == Some(courier_id) {
        return Ok(delivery);
    }
    if delivery.status != DeliveryStatus::SearchingCourier || delivery.courier_id.is_some() {
        return Err(AppError::AlreadyAssigned);
    }

    state.store.get_courier(courier_id)?;
    state.store.reserve_courier(courier_id, delivery_id)?;

    let now = Utc::now();
    let updated = {
        let mut entry = state
            .store
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id}")))?;
        entry.courier_id = Some(courier_id);
        entry.status = DeliveryStatus::CourierAssigned;
        entry.current_status_since = now;
        entry.value().clone()
    };

    state.store.append_status_event(StatusEvent {
        id: Uuid::new_v4(),
        delivery_id,
        status: DeliveryStatus::CourierAssigned,
        timestamp: now,
        location: None,
        notes: None,
        actor_id: Some(courier_id),
        is_system: false,
    });

    if let Some(mut profile) = state.store.couriers.get_mut(&courier_id) {
        profile.total_deliveries += 1;
        profile.updated_at = now;
    }

    state.metrics.deliveries_searching.dec();
    state
        .metrics
        .transitions_total
        .with_label_values(&["success"])
        .inc();

    state.bus.publish(
        &user_topic(courier_id),
        "delivery_request_accepted",
        json!({ "delivery_id": delivery_id }),
    );
    publish_status_change(state, &updated, None);
    notify::push(
        &state.store,
        &state.bus,
        updated.sender_id,
        NotificationType::StatusUpdate,
        "Courier assigned",
        "A courier accepted your delivery.",
        Some(delivery_id),
        None,
    );

    info!(delivery_id = %delivery_id, courier_id = %courier_id, "delivery claimed");
    Ok(updated)
}

/// Validates and commits one transition, with every bound side effect
/// (payment capture/refund, courier release, balance credit, status event,
/// notifications) in the same critical section.
pub async fn apply_transition(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    actor: Actor,
    target: DeliveryStatus,
    request: TransitionRequest,
) -> Result<Delivery, AppError> {
    let started = Instant::now();
    let lock = state.store.delivery_lock(delivery_id);
    let _guard = lock.lock().await;

    let result = transition_locked(state, delivery_id, actor, target, &request).await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .transition_latency_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .transitions_total
        .with_label_values(&[outcome])
        .inc();

    result
}

async fn transition_locked(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    actor: Actor,
    target: DeliveryStatus,
    request: &TransitionRequest,
) -> Result<Delivery, AppError> {
    let delivery = state.store.get_delivery(delivery_id)?;

    match actor {
        Actor::Sender(id) if delivery.sender_id != id => {
            return Err(AppError::Forbidden(
                "only the sender of this delivery may do that".to_string(),
            ))
        }
        Actor::Courier(id) if delivery.courier_id != Some(id) => {
            return Err(AppError::Forbidden(
                "only the assigned courier may do that".to_string(),
            ))
        }
        _ => {}
    }

    // Repeating the current status is a no-op, not an error; no new
    // event row is written.
    if delivery.status == target {
        return Ok(delivery);
    }

    let from = delivery.status;
    if !legal(from, target, actor.kind()) {
        return Err(AppError::InvalidTransition(format!(
            "cannot move from {} to {}",
            from.as_str(),
            target.as_str()
        )));
    }

    match target {
        DeliveryStatus::Cancelled | DeliveryStatus::Failed | DeliveryStatus::Returned => {
            if request
                .reason
                .as_deref()
                .map_or(true, |r| r.trim().is_empty())
            {
                return Err(AppError::Validation("a reason is required".to_string()));
            }
        }
        DeliveryStatus::Delivered => {
            let proof = request.proof.clone().unwrap_or_default();
            if delivery.requires_photo_proof
                && proof.photo_url.as_deref().map_or(true, str::is_empty)
            {
                return Err(AppError::ProofRequired(
                    "photo proof is required for this delivery".to_string(),
                ));
            }
            if delivery.requires_signature
                && proof.signature_url.as_deref().map_or(true, str::is_empty)
            {
                return Err(AppError::ProofRequired(
                    "signature is required for this delivery".to_string(),
                ));
            }
            if delivery.requires_id_verification && !proof.id_verified {
                return Err(AppError::ProofRequired(
                    "recipient id verification is required for this delivery".to_string(),
                ));
            }
        }
        _ => {}
    }

    let updated = set_status_locked(state, delivery_id, target, actor, request)?;

    match target {
        DeliveryStatus::Delivered => {
            settle_delivered(state, &updated).await?;
        }
        DeliveryStatus::Cancelled => {
            settle_cancelled(state, &updated, from, request).await?;
        }
        DeliveryStatus::Failed | DeliveryStatus::Returned => {
            settle_failed(state, &updated, request).await?;
        }
        _ => {}
    }

    publish_status_change(state, &updated, request.location);
    if actor.kind() == ActorKind::Courier || actor.kind() == ActorKind::System {
        notify::push(
            &state.store,
            &state.bus,
            updated.sender_id,
            NotificationType::StatusUpdate,
            status_headline(target),
            format!("Your delivery is now {}.", target.as_str().replace('_', " ")),
            Some(delivery_id),
            None,
        );
    }

    info!(
        delivery_id = %delivery_id,
        from = from.as_str(),
        to = target.as_str(),
        "delivery transition"
    );
    Ok(updated)
}

/// Writes the status move and its event row. Caller holds the row lock
/// and has already validated the edge.
fn set_status_locked(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    target: DeliveryStatus,
    actor: Actor,
    request: &TransitionRequest,
) -> Result<Delivery, AppError> {
    let now = Utc::now();
    let updated = {
        let mut entry = state
            .store
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id}")))?;

        entry.status = target;
        entry.current_status_since = now;

        match target {
            DeliveryStatus::PickedUp => {
                if entry.actual_pickup_time.is_none() {
                    entry.actual_pickup_time = Some(now);
                }
            }
            DeliveryStatus::Delivered => {
                if entry.actual_delivery_time.is_none() {
                    entry.actual_delivery_time = Some(now);
                }
                if let Some(proof) = &request.proof {
                    if proof.photo_url.is_some() {
                        entry.delivery_proof_url = proof.photo_url.clone();
                    }
                    if proof.signature_url.is_some() {
                        entry.signature_url = proof.signature_url.clone();
                    }
                    entry.id_verified_on_delivery = proof.id_verified;
                }
            }
            DeliveryStatus::Cancelled | DeliveryStatus::Failed | DeliveryStatus::Returned => {
                entry.cancellation_reason = request.reason.clone();
            }
            _ => {}
        }

        entry.value().clone()
    };

    state.store.append_status_event(StatusEvent {
        id: Uuid::new_v4(),
        delivery_id,
        status: target,
        timestamp: now,
        location: request.location,
        notes: request.notes.clone(),
        actor_id: actor.id(),
        is_system: actor.kind() == ActorKind::System,
    });

    Ok(updated)
}

/// Capture and courier credit; exactly once per delivery because the
/// delivered edge is reachable only once.
async fn settle_delivered(state: &Arc<AppState>, delivery: &Delivery) -> Result<(), AppError> {
    let payment = state.payments.capture(&state.store, delivery.id).await?;

    if let Some(courier_id) = delivery.courier_id {
        let earning = money::round2(payment.amount * commission_rate(state) + payment.tip);
        state.store.credit_courier(courier_id, earning);
        state.store.release_courier(courier_id, delivery.id);
        if let Some(mut profile) = state.store.couriers.get_mut(&courier_id) {
            profile.completed_deliveries += 1;
            profile.updated_at = Utc::now();
        }
        notify::push(
            &state.store,
            &state.bus,
            courier_id,
            NotificationType::Payment,
            "Delivery completed",
            format!("You earned {earning:.2} for this delivery."),
            Some(delivery.id),
            None,
        );
    }

    state
        .metrics
        .deliveries_total
        .with_label_values(&["delivered"])
        .inc();
    Ok(())
}

async fn settle_cancelled(
    state: &Arc<AppState>,
    delivery: &Delivery,
    from: DeliveryStatus,
    request: &TransitionRequest,
) -> Result<(), AppError> {
    if from == DeliveryStatus::SearchingCourier {
        state.metrics.deliveries_searching.dec();
    }

    if let Ok(payment) = state.store.get_payment(delivery.id) {
        // Nothing to give back on a payment that never authorized.
        if matches!(
            payment.status,
            PaymentStatus::Authorized | PaymentStatus::Captured
        ) {
            let refund = cancellation_refund(from, payment.amount);
            let reason = request.reason.as_deref().unwrap_or("cancelled by sender");
            state
                .payments
                .refund(&state.store, delivery.id, refund, reason)
                .await?;
        }
    }

    if let Some(courier_id) = delivery.courier_id {
        state.store.release_courier(courier_id, delivery.id);
        if let Some(mut profile) = state.store.couriers.get_mut(&courier_id) {
            profile.cancelled_deliveries += 1;
            profile.updated_at = Utc::now();
        }
        notify::push(
            &state.store,
            &state.bus,
            courier_id,
            NotificationType::StatusUpdate,
            "Delivery cancelled",
            "The sender cancelled this delivery.",
            Some(delivery.id),
            None,
        );
    }

    state
        .metrics
        .deliveries_total
        .with_label_values(&["cancelled"])
        .inc();
    Ok(())
}

/// Failed and returned void the authorization: a full refund for
/// accounting purposes.
async fn settle_failed(
    state: &Arc<AppState>,
    delivery: &Delivery,
    request: &TransitionRequest,
) -> Result<(), AppError> {
    if let Ok(payment) = state.store.get_payment(delivery.id) {
        if matches!(
            payment.status,
            PaymentStatus::Authorized | PaymentStatus::Captured
        ) {
            let reason = request.reason.as_deref().unwrap_or("delivery failed");
            state
                .payments
                .refund(&state.store, delivery.id, payment.amount, reason)
                .await?;
        }
    }

    if let Some(courier_id) = delivery.courier_id {
        state.store.release_courier(courier_id, delivery.id);
        if let Some(mut profile) = state.store.couriers.get_mut(&courier_id) {
            profile.updated_at = Utc::now();
        }
    }

    state
        .metrics
        .deliveries_total
        .with_label_values(&[delivery.status.as_str()])
        .inc();
    Ok(())
}

/// Post-delivery tip: the payment row takes the delta and the courier is
/// credited immediately.
pub async fn add_tip(
    state: &Arc<AppState>,
    delivery_id: Uuid,
    sender_id: Uuid,
    amount: f64,
) -> Result<Payment, AppError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::Validation("tip must be positive".to_string()));
    }

    let lock = state.store.delivery_lock(delivery_id);
    let _guard = lock.lock().await;

    let delivery = state.store.get_delivery(delivery_id)?;
    if delivery.sender_id != sender_id {
        return Err(AppError::Forbidden(
            "only the sender may tip this delivery".to_string(),
        ));
    }
    if delivery.status != DeliveryStatus::Delivered {
        return Err(AppError::InvalidTransition(
            "tips can only be added after delivery".to_string(),
        ));
    }

    let payment = state
        .payments
        .add_tip(&state.store, delivery_id, amount)
        .await?;

    if let Some(courier_id) = delivery.courier_id {
        state.store.credit_courier(courier_id, money::round2(amount));
        notify::push(
            &state.store,
            &state.bus,
            courier_id,
            NotificationType::Payment,
            "You received a tip",
            format!("The sender added a {amount:.2} tip."),
            Some(delivery_id),
            None,
        );
    }

    Ok(payment)
}

fn publish_status_change(state: &Arc<AppState>, delivery: &Delivery, location: Option<GeoPoint>) {
    state.bus.publish(
        &delivery_topic(delivery.id),
        "delivery_status_change",
        json!({
            "delivery_id": delivery.id,
            "status": delivery.status,
            "timestamp": delivery.current_status_since,
            "location": location,
            "estimated_delivery_time": delivery.estimated_delivery_time,
        }),
    );
}

fn status_headline(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::CourierAssigned => "Courier assigned",
        DeliveryStatus::EnRouteToPickup => "Courier en route to pickup",
        DeliveryStatus::ApproachingPickup => "Courier approaching pickup",
        DeliveryStatus::AtPickup => "Courier at pickup",
        DeliveryStatus::PickedUp => "Package picked up",
        DeliveryStatus::InTransit => "Package in transit",
        DeliveryStatus::ApproachingDropoff => "Courier approaching dropoff",
        DeliveryStatus::AtDropoff => "Courier at dropoff",
        DeliveryStatus::Delivered => "Package delivered",
        DeliveryStatus::Cancelled => "Delivery cancelled",
        DeliveryStatus::Failed => "Delivery failed",
        DeliveryStatus::Returned => "Package returned",
        _ => "Delivery update",
    }
}

#[cfg(test)]
mod tests {
    use super::{cancellation_refund, legal, ActorKind};
    use crate::models::delivery::DeliveryStatus::*;

    #[test]
    fn the_happy_path_is_legal() {
        assert!(legal(Pending, SearchingCourier, ActorKind::System));
        assert!(legal(SearchingCourier, CourierAssigned, ActorKind::System));
        assert!(legal(CourierAssigned, EnRouteToPickup, ActorKind::Courier));
        assert!(legal(EnRouteToPickup, ApproachingPickup, ActorKind::System));
        assert!(legal(ApproachingPickup, AtPickup, ActorKind::Courier));
        assert!(legal(AtPickup, PickedUp, ActorKind::Courier));
        assert!(legal(PickedUp, InTransit, ActorKind::Courier));
        assert!(legal(InTransit, ApproachingDropoff, ActorKind::System));
        assert!(legal(ApproachingDropoff, AtDropoff, ActorKind::Courier));
        assert!(legal(AtDropoff, Delivered, ActorKind::Courier));
    }

    #[test]
    fn actors_cannot_borrow_each_others_edges() {
        assert!(!legal(Pending, SearchingCourier, ActorKind::Sender));
        assert!(!legal(CourierAssigned, EnRouteToPickup, ActorKind::Sender));
        assert!(!legal(SearchingCourier, Cancelled, ActorKind::Courier));
        assert!(!legal(EnRouteToPickup, ApproachingPickup, ActorKind::Courier));
    }

    #[test]
    fn no_transitions_out_of_terminal_states() {
        for terminal in [Delivered, Cancelled, Failed, Returned] {
            for target in [
                Pending,
                SearchingCourier,
                CourierAssigned,
                EnRouteToPickup,
                PickedUp,
                Delivered,
                Cancelled,
            ] {
                for actor in [ActorKind::Sender, ActorKind::Courier, ActorKind::System] {
                    assert!(!legal(terminal, target, actor));
                }
            }
        }
    }

    #[test]
    fn approaching_dropoff_requires_in_transit() {
        assert!(!legal(PickedUp, ApproachingDropoff, ActorKind::System));
        assert!(legal(InTransit, ApproachingDropoff, ActorKind::System));
    }

    #[test]
    fn cancellation_is_not_allowed_post_pickup() {
        assert!(!legal(PickedUp, Cancelled, ActorKind::Sender));
        assert!(!legal(InTransit, Cancelled, ActorKind::Sender));
        assert!(!legal(AtDropoff, Cancelled, ActorKind::Sender));
    }

    #[test]
    fn refund_schedule() {
        assert_eq!(cancellation_refund(Pending, 20.0), 20.0);
        assert_eq!(cancellation_refund(SearchingCourier, 20.0), 20.0);
        // min($5, 15% of 20) = 3.00 fee
        assert_eq!(cancellation_refund(EnRouteToPickup, 20.0), 17.0);
        // 15% of 100 = 15, capped at $5
        assert_eq!(cancellation_refund(CourierAssigned, 100.0), 95.0);
        assert_eq!(cancellation_refund(PickedUp, 20.0), 0.0);
    }
}
