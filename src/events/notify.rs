use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::events::bus::{self, EventBus};
use crate::models::notification::{Notification, NotificationChannels, NotificationType};
use crate::store::Store;

/// Persists the notification row, then pushes it on the user's topic.
/// Disconnected users find it in the store on their next fetch.
pub fn push(
    store: &Store,
    bus: &EventBus,
    user_id: Uuid,
    notification_type: NotificationType,
    title: impl Into<String>,
    content: impl Into<String>,
    delivery_id: Option<Uuid>,
    action_url: Option<String>,
) -> Notification {
    let notification = Notification {
        id: Uuid::new_v4(),
        user_id,
        notification_type,
        title: title.into(),
        content: content.into(),
        is_read: false,
        read_at: None,
        delivery_id,
        action_url,
        channels: NotificationChannels::default(),
        created_at: Utc::now(),
    };

    store.insert_notification(notification.clone());
    bus.publish(
        &bus::user_topic(user_id),
        "notification",
        json!(notification),
    );
    notification
}
