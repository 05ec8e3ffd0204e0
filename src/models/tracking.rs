use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, expiring credential granting read-only delivery access plus
/// chat-write scope on the bound delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingToken {
    pub token: String,
    pub delivery_id: Uuid,
    pub is_recipient: bool,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
