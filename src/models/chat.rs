use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who wrote a delivery-chat message. `Recipient` is the sentinel for
/// tracking-token holders, who have no user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Sender,
    Courier,
    Recipient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub sender_type: ChatRole,
    /// None when the writer is the package recipient.
    pub sender_id: Option<Uuid>,
    /// None when the message is addressed to the package recipient.
    pub recipient_id: Option<Uuid>,
    pub content: String,
    pub attachment_url: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
