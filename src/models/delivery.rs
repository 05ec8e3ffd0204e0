use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    SearchingCourier,
    CourierAssigned,
    EnRouteToPickup,
    ApproachingPickup,
    AtPickup,
    PickedUp,
    InTransit,
    ApproachingDropoff,
    AtDropoff,
    Delivered,
    Cancelled,
    Failed,
    Returned,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered
                | DeliveryStatus::Cancelled
                | DeliveryStatus::Failed
                | DeliveryStatus::Returned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::SearchingCourier => "searching_courier",
            DeliveryStatus::CourierAssigned => "courier_assigned",
            DeliveryStatus::EnRouteToPickup => "en_route_to_pickup",
            DeliveryStatus::ApproachingPickup => "approaching_pickup",
            DeliveryStatus::AtPickup => "at_pickup",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::ApproachingDropoff => "approaching_dropoff",
            DeliveryStatus::AtDropoff => "at_dropoff",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Returned => "returned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Standard,
    Express,
    Urgent,
}

/// Address snapshot, immutable after delivery creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    pub location: GeoPoint,
    #[serde(default)]
    pub access_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientContact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageType {
    pub id: Uuid,
    pub name: String,
    pub base_price: f64,
    /// Pounds; also the denominator of the weight-fee formula.
    pub max_weight: f64,
}

/// The lifecycle aggregate. Status, courier binding, and the actual-time
/// stamps are mutated only by the lifecycle engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub pickup: Address,
    pub dropoff: Address,
    pub package_type_id: Uuid,
    pub status: DeliveryStatus,
    pub current_status_since: DateTime<Utc>,
    pub scheduled_pickup_time: Option<DateTime<Utc>>,
    pub actual_pickup_time: Option<DateTime<Utc>>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub package_description: Option<String>,
    pub package_weight: f64,
    pub is_fragile: bool,
    pub requires_signature: bool,
    pub requires_id_verification: bool,
    pub requires_photo_proof: bool,
    pub recipient: RecipientContact,
    /// 4 digits, shown to the sender and the assigned courier only.
    pub verification_code: String,
    pub special_instructions: Option<String>,
    pub distance_miles: f64,
    pub estimated_duration_minutes: i64,
    pub priority: Priority,
    pub cancellation_reason: Option<String>,
    pub package_photo_url: Option<String>,
    pub delivery_proof_url: Option<String>,
    pub signature_url: Option<String>,
    pub id_verified_on_delivery: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only log entry; the newest row always mirrors `Delivery.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub notes: Option<String>,
    pub actor_id: Option<Uuid>,
    pub is_system: bool,
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus;

    #[test]
    fn terminal_statuses() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(DeliveryStatus::Returned.is_terminal());
        assert!(!DeliveryStatus::InTransit.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DeliveryStatus::EnRouteToPickup).unwrap();
        assert_eq!(json, "\"en_route_to_pickup\"");
    }
}
