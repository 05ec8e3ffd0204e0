use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

/// Append-only position report from a courier device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub location: GeoPoint,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    /// Meters per second, as reported by the device.
    pub speed: Option<f64>,
    pub battery_level: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}
