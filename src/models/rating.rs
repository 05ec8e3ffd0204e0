use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// At most one per rater per delivery. Senders score all four axes;
/// couriers score overall only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub rater_id: Uuid,
    pub ratee_id: Uuid,
    pub overall: u8,
    pub timeliness: Option<u8>,
    pub communication: Option<u8>,
    pub handling: Option<u8>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryIssue {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub reporter_id: Uuid,
    pub category: Option<String>,
    pub description: String,
    pub status: IssueStatus,
    pub created_at: DateTime<Utc>,
}
