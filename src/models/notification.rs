use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    StatusUpdate,
    Message,
    Rating,
    Payment,
    Promotional,
    System,
}

/// Which carriers should deliver this notification; the carriers
/// themselves are external.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotificationChannels {
    pub push: bool,
    pub email: bool,
    pub sms: bool,
}

impl Default for NotificationChannels {
    fn default() -> Self {
        Self {
            push: true,
            email: false,
            sms: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub delivery_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub channels: NotificationChannels,
    pub created_at: DateTime<Utc>,
}
