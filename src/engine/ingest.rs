use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::engine::lifecycle::{self, Actor, TransitionRequest};
use crate::error::AppError;
use crate::events::bus::delivery_topic;
use crate::geo;
use crate::models::courier::GeoPoint;
use crate::models::delivery::DeliveryStatus;
use crate::models::location::LocationSample;
use crate::state::AppState;

const APPROACH_PICKUP_METERS: f64 = 200.0;
const APPROACH_DROPOFF_METERS: f64 = 500.0;
/// ETA floor, meters per second; devices report 0 when parked.
const SPEED_FLOOR_MPS: f64 = 8.0;

#[derive(Debug, Clone, Deserialize)]
pub struct SampleInput {
    pub location: GeoPoint,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_id: Option<Uuid>,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Applied(LocationSample),
    /// Older than the last persisted position for this courier.
    Discarded,
}

/// Linear handler: persist the sample, move the courier marker, then ask
/// the lifecycle engine about proximity transitions and push the live
/// position to the delivery room.
pub async fn ingest(
    state: &Arc<AppState>,
    courier_id: Uuid,
    input: SampleInput,
) -> Result<IngestOutcome, AppError> {
    if !input.location.is_valid() {
        return Err(AppError::Validation("invalid coordinates".to_string()));
    }

    let recorded_at = input.recorded_at.unwrap_or_else(Utc::now);
    let profile = state.store.courier_profile(courier_id);

    if let Some(last) = profile.location_updated_at {
        if recorded_at <= last {
            debug!(courier_id = %courier_id, "discarding stale location sample");
            return Ok(IngestOutcome::Discarded);
        }
    }

    let active_delivery = input.delivery_id.or(profile.active_delivery_id);

    let sample = LocationSample {
        id: Uuid::new_v4(),
        user_id: courier_id,
        delivery_id: active_delivery,
        location: input.location,
        accuracy: input.accuracy,
        heading: input.heading,
        speed: input.speed,
        battery_level: input.battery_level,
        recorded_at,
    };
    state.store.record_location(sample.clone());

    if let Some(mut entry) = state.store.couriers.get_mut(&courier_id) {
        entry.location = Some(input.location);
        entry.location_updated_at = Some(recorded_at);
        entry.updated_at = Utc::now();
    }

    if let Some(delivery_id) = active_delivery {
        track_active_delivery(state, courier_id, delivery_id, &sample).await?;
    }

    Ok(IngestOutcome::Applied(sample))
}

async fn track_active_delivery(
    state: &Arc<AppState>,
    courier_id: Uuid,
    delivery_id: Uuid,
    sample: &LocationSample,
) -> Result<(), AppError> {
    let delivery = match state.store.deliveries.get(&delivery_id) {
        Some(d) => d.value().clone(),
        None => return Ok(()),
    };
    if delivery.courier_id != Some(courier_id) || delivery.status.is_terminal() {
        return Ok(());
    }

    let to_pickup = geo::distance_meters(&sample.location, &delivery.pickup.location);
    let to_dropoff = geo::distance_meters(&sample.location, &delivery.dropoff.location);

    let auto_target = match delivery.status {
        DeliveryStatus::EnRouteToPickup if to_pickup < APPROACH_PICKUP_METERS => {
            Some(DeliveryStatus::ApproachingPickup)
        }
        DeliveryStatus::InTransit if to_dropoff < APPROACH_DROPOFF_METERS => {
            Some(DeliveryStatus::ApproachingDropoff)
        }
        _ => None,
    };

    if let Some(target) = auto_target {
        let request = TransitionRequest {
            location: Some(sample.location),
            ..TransitionRequest::default()
        };
        lifecycle::apply_transition(state, delivery_id, Actor::System, target, request).await?;
    }

    let eta = estimate_arrival(&delivery.status, to_pickup, to_dropoff, &delivery, sample);
    if let Some(eta) = eta {
        if let Some(mut entry) = state.store.deliveries.get_mut(&delivery_id) {
            entry.estimated_delivery_time = Some(eta);
        }
    }

    state.bus.publish(
        &delivery_topic(delivery_id),
        "track_delivery_location",
        json!({
            "delivery_id": delivery_id,
            "location": sample.location,
            "heading": sample.heading,
            "speed": sample.speed,
            "estimated_delivery_time": eta,
            "recorded_at": sample.recorded_at,
        }),
    );

    Ok(())
}

/// `now + remaining / max(speed, floor)`. Before pickup the remaining
/// path still includes the full pickup-to-dropoff leg.
fn estimate_arrival(
    status: &DeliveryStatus,
    to_pickup_m: f64,
    to_dropoff_m: f64,
    delivery: &crate::models::delivery::Delivery,
    sample: &LocationSample,
) -> Option<DateTime<Utc>> {
    let remaining_m = match status {
        DeliveryStatus::CourierAssigned
        | DeliveryStatus::EnRouteToPickup
        | DeliveryStatus::ApproachingPickup
        | DeliveryStatus::AtPickup => to_pickup_m + delivery.distance_miles / geo::MILES_PER_KM * 1_000.0,
        DeliveryStatus::PickedUp
        | DeliveryStatus::InTransit
        | DeliveryStatus::ApproachingDropoff
        | DeliveryStatus::AtDropoff => to_dropoff_m,
        _ => return None,
    };

    let speed = sample.speed.unwrap_or(0.0).max(SPEED_FLOOR_MPS);
    let seconds = (remaining_m / speed).ceil() as i64;
    Some(Utc::now() + Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::{estimate_arrival, SPEED_FLOOR_MPS};
    use crate::models::courier::GeoPoint;
    use crate::models::delivery::{
        Address, Delivery, DeliveryStatus, Priority, RecipientContact,
    };
    use crate::models::location::LocationSample;
    use chrono::Utc;
    use uuid::Uuid;

    fn delivery(status: DeliveryStatus) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            courier_id: Some(Uuid::new_v4()),
            pickup: Address {
                street: "1 Test St".to_string(),
                city: "SF".to_string(),
                postal_code: None,
                location: GeoPoint { lat: 37.7897, lng: -122.3972 },
                access_notes: None,
            },
            dropoff: Address {
                street: "2 Test St".to_string(),
                city: "SF".to_string(),
                postal_code: None,
                location: GeoPoint { lat: 37.7663, lng: -122.4005 },
                access_notes: None,
            },
            package_type_id: Uuid::from_u128(2),
            status,
            current_status_since: Utc::now(),
            scheduled_pickup_time: None,
            actual_pickup_time: None,
            actual_delivery_time: None,
            estimated_delivery_time: None,
            package_description: None,
            package_weight: 1.0,
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

    fn sample(speed: Option<f64>) -> LocationSample {
        LocationSample {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            delivery_id: None,
            location: GeoPoint { lat: 37.78, lng: -122.40 },
            accuracy: None,
            heading: None,
            speed,
            battery_level: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn slow_couriers_use_the_speed_floor() {
        let d = delivery(DeliveryStatus::InTransit);
        let crawling = estimate_arrival(&d.status, 0.0, 8_000.0, &d, &sample(Some(0.5))).unwrap();
        let floored = estimate_arrival(&d.status, 0.0, 8_000.0, &d, &sample(None)).unwrap();

        // 8 km at the 8 m/s floor is ~1000 seconds either way.
        let spread = (crawling - floored).num_seconds().abs();
        assert!(spread <= 1, "floor should apply to both, spread {spread}s");

        let fast = estimate_arrival(&d.status, 0.0, 8_000.0, &d, &sample(Some(SPEED_FLOOR_MPS * 4.0)))
            .unwrap();
        assert!(fast < crawling);
    }

    #[test]
    fn pre_pickup_eta_includes_the_delivery_leg() {
        let before = delivery(DeliveryStatus::EnRouteToPickup);
        let after = delivery(DeliveryStatus::InTransit);
        let s = sample(None);

        let eta_before = estimate_arrival(&before.status, 1_000.0, 4_000.0, &before, &s).unwrap();
        let eta_after = estimate_arrival(&after.status, 1_000.0, 4_000.0, &after, &s).unwrap();
        assert!(eta_before > eta_after);
    }

    #[test]
    fn no_eta_for_terminal_states() {
        let d = delivery(DeliveryStatus::Delivered);
        assert!(estimate_arrival(&d.status, 0.0, 0.0, &d, &sample(None)).is_none());
    }
}
