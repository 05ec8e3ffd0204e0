use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundCheckStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdVerificationStatus {
    Pending,
    Verified,
    Rejected,
}

/// One per courier user. Screening fields are written by the external
/// profile service; the dispatch core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierProfile {
    pub user_id: Uuid,
    pub is_available: bool,
    pub location: Option<GeoPoint>,
    pub location_updated_at: Option<DateTime<Utc>>,
    /// Heaviest package this courier accepts, in pounds.
    pub max_weight_capacity: f64,
    /// Miles from the service-area center (or current position).
    pub service_area_radius: f64,
    pub service_area_center: Option<GeoPoint>,
    pub background_check_status: BackgroundCheckStatus,
    pub id_verification_status: IdVerificationStatus,
    /// At most one non-terminal delivery; cleared only through the
    /// lifecycle engine.
    pub active_delivery_id: Option<Uuid>,
    pub rating: f64,
    pub rating_count: u32,
    pub total_deliveries: u32,
    pub completed_deliveries: u32,
    pub cancelled_deliveries: u32,
    pub account_balance: f64,
    pub updated_at: DateTime<Utc>,
}

impl CourierProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_available: false,
            location: None,
            location_updated_at: None,
            max_weight_capacity: 50.0,
            service_area_radius: 10.0,
            service_area_center: None,
            background_check_status: BackgroundCheckStatus::Approved,
            id_verification_status: IdVerificationStatus::Verified,
            active_delivery_id: None,
            rating: 5.0,
            rating_count: 0,
            total_deliveries: 0,
            completed_deliveries: 0,
            cancelled_deliveries: 0,
            account_balance: 0.0,
            updated_at: Utc::now(),
        }
    }
}
