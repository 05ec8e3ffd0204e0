use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::bus::{delivery_topic, user_topic};
use crate::geo;
use crate::models::courier::{
    BackgroundCheckStatus, CourierProfile, IdVerificationStatus,
};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::state::AppState;
use crate::store::setting_keys;

const OFFER_TTL_MINUTES: i64 = 15;

/// Matching loop: consumes ids of deliveries entering
/// `searching_courier` and fans offers out to every eligible courier.
/// Acceptance races back in through the lifecycle claim, not here.
pub async fn run_dispatcher(state: Arc<AppState>, mut delivery_rx: mpsc::Receiver<Uuid>) {
    info!("dispatcher started");

    while let Some(delivery_id) = delivery_rx.recv().await {
        match offer_delivery(&state, delivery_id).await {
            Ok(offers) => {
                if offers == 0 {
                    warn!(delivery_id = %delivery_id, "no eligible couriers for delivery");
                }
            }
            Err(err) => {
                error!(delivery_id = %delivery_id, error = %err, "failed to dispatch delivery");
            }
        }
    }

    warn!("dispatcher stopped: queue channel closed");
}

/// One fan-out round for a searching delivery; also arms the search
/// timeout watchdog.
pub async fn offer_delivery(state: &Arc<AppState>, delivery_id: Uuid) -> Result<usize, AppError> {
    let delivery = state.store.get_delivery(delivery_id)?;
    if delivery.status != DeliveryStatus::SearchingCourier {
        return Ok(0);
    }

    let payment_amount = state
        .store
        .get_payment(delivery_id)
        .map(|p| p.amount)
        .unwrap_or(0.0);
    let commission = state
        .store
        .setting_f64(setting_keys::COURIER_COMMISSION_RATE, 0.8);
    let min_rating = state
        .store
        .setting_f64(setting_keys::MIN_COURIER_RATING, 0.0);
    let expires_at = offer_expiry(Utc::now(), delivery.scheduled_pickup_time);

    let candidates: Vec<CourierProfile> = state
        .store
        .couriers
        .iter()
        .filter(|entry| eligible(entry.value(), &delivery, min_rating))
        .map(|entry| entry.value().clone())
        .collect();

    for courier in &candidates {
        let offer = build_offer(&delivery, courier, payment_amount, commission, expires_at);
        state
            .bus
            .publish(&user_topic(courier.user_id), "delivery_request", offer);
        state.metrics.dispatch_offers_total.inc();
    }

    info!(
        delivery_id = %delivery_id,
        offers = candidates.len(),
        "delivery offered to couriers"
    );

    spawn_search_watchdog(state.clone(), delivery_id);
    Ok(candidates.len())
}

/// The eligibility predicate. Every clause must hold.
pub fn eligible(courier: &CourierProfile, delivery: &Delivery, min_rating: f64) -> bool {
    if !courier.is_available || courier.active_delivery_id.is_some() {
        return false;
    }
    if courier.max_weight_capacity < delivery.package_weight {
        return false;
    }
    let position = match &courier.location {
        Some(p) => p,
        None => return false,
    };
    let center = courier.service_area_center.as_ref().unwrap_or(position);
    if !geo::within_radius_miles(center, &delivery.pickup.location, courier.service_area_radius) {
        return false;
    }
    if courier.background_check_status != BackgroundCheckStatus::Approved
        || courier.id_verification_status != IdVerificationStatus::Verified
    {
        return false;
    }
    courier.rating >= min_rating
}

/// Offer envelope; the same shape serves the push fan-out and the pull
/// view. Never includes the verification code or the full pickup access
/// notes; those come with a winning claim.
pub fn build_offer(
    delivery: &Delivery,
    courier: &CourierProfile,
    payment_amount: f64,
    commission: f64,
    expires_at: DateTime<Utc>,
) -> Value {
    let pickup_distance = courier
        .location
        .as_ref()
        .map(|p| crate::pricing::money::round2(geo::distance_miles(p, &delivery.pickup.location)));

    json!({
        "delivery_id": delivery.id,
        "pickup_city": delivery.pickup.city,
        "dropoff_city": delivery.dropoff.city,
        "pickup_location": delivery.pickup.location,
        "dropoff_location": delivery.dropoff.location,
        "distance_miles": delivery.distance_miles,
        "pickup_distance_miles": pickup_distance,
        "package_weight": delivery.package_weight,
        "priority": delivery.priority,
        "estimated_earnings": crate::pricing::money::round2(payment_amount * commission),
        "scheduled_pickup_time": delivery.scheduled_pickup_time,
        "expires_at": expires_at,
    })
}

/// 15 minutes, or the scheduled pickup if that comes sooner.
fn offer_expiry(now: DateTime<Utc>, scheduled_pickup: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let default = now + Duration::minutes(OFFER_TTL_MINUTES);
    match scheduled_pickup {
        Some(pickup) if pickup < default => pickup,
        _ => default,
    }
}

/// After `max_search_time` minutes without a claim, announce expiry and
/// leave the delivery in `searching_courier` for manual escalation.
fn spawn_search_watchdog(state: Arc<AppState>, delivery_id: Uuid) {
    let minutes = state.store.setting_i64(setting_keys::MAX_SEARCH_TIME, 30);
    tokio::spawn(async move {
        sleep(std::time::Duration::from_secs((minutes * 60) as u64)).await;

        let still_searching = state
            .store
            .deliveries
            .get(&delivery_id)
            .map(|d| d.value().status == DeliveryStatus::SearchingCourier)
            .unwrap_or(false);
        if !still_searching {
            return;
        }

        warn!(delivery_id = %delivery_id, "courier search expired");
        let payload = json!({ "delivery_id": delivery_id });
        state
            .bus
            .publish(&delivery_topic(delivery_id), "search_expired", payload.clone());
        if let Some(delivery) = state.store.deliveries.get(&delivery_id) {
            state
                .bus
                .publish(&user_topic(delivery.value().sender_id), "search_expired", payload);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::{eligible, offer_expiry};
    use crate::models::courier::{
        BackgroundCheckStatus, CourierProfile, GeoPoint, IdVerificationStatus,
    };
    use crate::models::delivery::{
        Address, Delivery, DeliveryStatus, Priority, RecipientContact,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn address(lat: f64, lng: f64) -> Address {
        Address {
            street: "1 Test St".to_string(),
            city: "San Francisco".to_string(),
            postal_code: None,
            location: GeoPoint { lat, lng },
            access_notes: None,
        }
    }

    fn delivery(weight: f64) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            courier_id: None,
            pickup: address(37.7897, -122.3972),
            dropoff: address(37.7663, -122.4005),
            package_type_id: Uuid::from_u128(2),
            status: DeliveryStatus::SearchingCourier,
            current_status_since: Utc::now(),
            scheduled_pickup_time: None,
            actual_pickup_time: None,
            actual_delivery_time: None,
            estimated_delivery_time: None,
            package_description: None,
            package_weight: weight,
            is_fragile: false,
            requires_signature: false,
            requires_id_verification: false,
            requires_photo_proof: false,
            recipient: RecipientContact {
                name: "Pat".to_string(),
                phone: "+14155550100".to_string(),
                email: None,
            },
            verification_code: "0000".to_string(),
            special_instructions: None,
            distance_miles: 1.6,
            estimated_duration_minutes: 8,
            priority: Priority::Standard,
            cancellation_reason: None,
            package_photo_url: None,
            delivery_proof_url: None,
            signature_url: None,
            id_verified_on_delivery: false,
            created_at: Utc::now(),
        }
    }

    fn courier_nearby() -> CourierProfile {
        let mut profile = CourierProfile::new(Uuid::new_v4());
        profile.is_available = true;
        profile.location = Some(GeoPoint {
            lat: 37.7890,
            lng: -122.3970,
        });
        profile.location_updated_at = Some(Utc::now());
        profile
    }

    #[test]
    fn nearby_available_courier_is_eligible() {
        assert!(eligible(&courier_nearby(), &delivery(3.5), 0.0));
    }

    #[test]
    fn busy_courier_is_not_eligible() {
        let mut courier = courier_nearby();
        courier.active_delivery_id = Some(Uuid::new_v4());
        assert!(!eligible(&courier, &delivery(3.5), 0.0));
    }

    #[test]
    fn unavailable_courier_is_not_eligible() {
        let mut courier = courier_nearby();
        courier.is_available = false;
        assert!(!eligible(&courier, &delivery(3.5), 0.0));
    }

    #[test]
    fn overweight_package_filters_the_courier() {
        let mut courier = courier_nearby();
        courier.max_weight_capacity = 10.0;
        assert!(!eligible(&courier, &delivery(12.0), 0.0));
    }

    #[test]
    fn out_of_area_pickup_filters_the_courier() {
        let mut courier = courier_nearby();
        courier.location = Some(GeoPoint { lat: 34.05, lng: -118.24 });
        assert!(!eligible(&courier, &delivery(3.5), 0.0));
    }

    #[test]
    fn unscreened_courier_is_not_eligible() {
        let mut courier = courier_nearby();
        courier.background_check_status = BackgroundCheckStatus::Pending;
        assert!(!eligible(&courier, &delivery(3.5), 0.0));

        let mut courier = courier_nearby();
        courier.id_verification_status = IdVerificationStatus::Pending;
        assert!(!eligible(&courier, &delivery(3.5), 0.0));
    }

    #[test]
    fn low_rating_filters_the_courier() {
        let mut courier = courier_nearby();
        courier.rating = 3.0;
        assert!(!eligible(&courier, &delivery(3.5), 4.0));
    }

    #[test]
    fn offer_expiry_caps_at_scheduled_pickup() {
        let now = Utc::now();
        let soon = now + Duration::minutes(5);
        assert_eq!(offer_expiry(now, Some(soon)), soon);

        let later = now + Duration::hours(2);
        assert_eq!(offer_expiry(now, Some(later)), now + Duration::minutes(15));
        assert_eq!(offer_expiry(now, None), now + Duration::minutes(15));
    }
}
