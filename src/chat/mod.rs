use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::events::bus::delivery_topic;
use crate::events::notify;
use crate::models::chat::{ChatRole, Message};
use crate::models::delivery::Delivery;
use crate::models::notification::NotificationType;
use crate::models::tracking::TrackingToken;
use crate::state::AppState;

/// A resolved chat participant. Construction goes through
/// [`resolve_access`], which is the only door into a delivery's room.
#[derive(Debug, Clone)]
pub enum ChatAccess {
    User { user_id: Uuid, role: ChatRole },
    Recipient(TrackingToken),
}

/// Admits senders, assigned couriers, and holders of a live tracking
/// token bound to the delivery. Everyone else is turned away.
pub fn resolve_access(
    delivery: &Delivery,
    user: Option<Uuid>,
    token: Option<&TrackingToken>,
) -> Result<ChatAccess, AppError> {
    if let Some(user_id) = user {
        if delivery.sender_id == user_id {
            return Ok(ChatAccess::User {
                user_id,
                role: ChatRole::Sender,
            });
        }
        if delivery.courier_id == Some(user_id) {
            return Ok(ChatAccess::User {
                user_id,
                role: ChatRole::Courier,
            });
        }
        return Err(AppError::Forbidden(
            "not a participant of this delivery".to_string(),
        ));
    }

    if let Some(token) = token {
        if token.delivery_id == delivery.id {
            return Ok(ChatAccess::Recipient(token.clone()));
        }
        return Err(AppError::Forbidden(
            "token is bound to another delivery".to_string(),
        ));
    }

    Err(AppError::Auth("missing credentials".to_string()))
}

pub fn history(state: &AppState, delivery: &Delivery, _access: &ChatAccess) -> Vec<Message> {
    state.store.messages_for(delivery.id)
}

/// Persists and fans out one message. Token holders write under the
/// `recipient` sentinel; their messages route to the courier when one is
/// bound, otherwise to the sender.
pub fn send(
    state: &Arc<AppState>,
    delivery: &Delivery,
    access: &ChatAccess,
    content: String,
    attachment_url: Option<String>,
) -> Result<Message, AppError> {
    if content.trim().is_empty() {
        return Err(AppError::Validation("message content is required".to_string()));
    }

    let (sender_type, sender_id, recipient_id) = match access {
        ChatAccess::User {
            user_id,
            role: ChatRole::Sender,
        } => (ChatRole::Sender, Some(*user_id), delivery.courier_id),
        ChatAccess::User {
            user_id,
            role: ChatRole::Courier,
        } => (ChatRole::Courier, Some(*user_id), Some(delivery.sender_id)),
        ChatAccess::User { .. } => {
            return Err(AppError::Forbidden("not a chat participant".to_string()))
        }
        ChatAccess::Recipient(token) => {
            if !token.is_recipient {
                return Err(AppError::Forbidden(
                    "this tracking link is read-only for chat".to_string(),
                ));
            }
            let routed = delivery.courier_id.unwrap_or(delivery.sender_id);
            (ChatRole::Recipient, None, Some(routed))
        }
    };

    let message = Message {
        id: Uuid::new_v4(),
        delivery_id: delivery.id,
        sender_type,
        sender_id,
        recipient_id,
        content,
        attachment_url,
        is_read: false,
        read_at: None,
        created_at: Utc::now(),
    };
    state.store.insert_message(message.clone());

    state.bus.publish(
        &delivery_topic(delivery.id),
        "new_message",
        json!(message),
    );
    if let Some(recipient) = recipient_id {
        notify::push(
            &state.store,
            &state.bus,
            recipient,
            NotificationType::Message,
            "New message",
            preview(&message.content),
            Some(delivery.id),
            None,
        );
    }

    Ok(message)
}

/// Only the message's recipient can mark it read.
pub fn mark_read(
    state: &Arc<AppState>,
    message_id: Uuid,
    user: Option<Uuid>,
    token: Option<&TrackingToken>,
) -> Result<Message, AppError> {
    let mut entry = state
        .store
        .messages
        .get_mut(&message_id)
        .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))?;

    let allowed = match entry.recipient_id {
        Some(recipient) => user == Some(recipient),
        // Addressed to the package recipient: any live token on the
        // same delivery may acknowledge it.
        None => token.is_some_and(|t| t.delivery_id == entry.delivery_id),
    };
    if !allowed {
        return Err(AppError::Forbidden(
            "only the recipient may mark a message read".to_string(),
        ));
    }

    if !entry.is_read {
        entry.is_read = true;
        entry.read_at = Some(Utc::now());
    }
    let message = entry.value().clone();
    drop(entry);

    state.bus.publish(
        &delivery_topic(message.delivery_id),
        "message_read",
        json!({ "message_id": message.id, "read_at": message.read_at }),
    );
    Ok(message)
}

fn preview(content: &str) -> String {
    const MAX: usize = 80;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let cut: String = content.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve_access, ChatAccess};
    use crate::models::chat::ChatRole;
    use crate::models::courier::GeoPoint;
    use crate::models::delivery::{Address, Delivery, DeliveryStatus, Priority, RecipientContact};
    use crate::models::tracking::TrackingToken;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn delivery(sender: Uuid, courier: Option<Uuid>) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            sender_id: sender,
            courier_id: courier,
            pickup: Address {
                street: "1 Test St".to_string(),
                city: "SF".to_string(),
                postal_code: None,
                location: GeoPoint { lat: 37.78, lng: -122.4 },
                access_notes: None,
            },
            dropoff: Address {
                street: "2 Test St".to_string(),
                city: "SF".to_string(),
                postal_code: None,
                location: GeoPoint { lat: 37.76, lng: -122.41 },
                access_notes: None,
            },
            package_type_id: Uuid::from_u128(2),
            status: DeliveryStatus::CourierAssigned,
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

    fn token_for(delivery_id: Uuid, is_recipient: bool) -> TrackingToken {
        TrackingToken {
            token: "t".repeat(32),
            delivery_id,
            is_recipient,
            expires_at: Utc::now() + Duration::days(7),
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn participants_resolve_to_their_roles() {
        let sender = Uuid::new_v4();
        let courier = Uuid::new_v4();
        let d = delivery(sender, Some(courier));

        match resolve_access(&d, Some(sender), None).unwrap() {
            ChatAccess::User { role, .. } => assert_eq!(role, ChatRole::Sender),
            other => panic!("unexpected access {other:?}"),
        }
        match resolve_access(&d, Some(courier), None).unwrap() {
            ChatAccess::User { role, .. } => assert_eq!(role, ChatRole::Courier),
            other => panic!("unexpected access {other:?}"),
        }
    }

    #[test]
    fn strangers_are_rejected() {
        let d = delivery(Uuid::new_v4(), None);
        assert!(resolve_access(&d, Some(Uuid::new_v4()), None).is_err());
        assert!(resolve_access(&d, None, None).is_err());
    }

    #[test]
    fn token_must_match_the_delivery() {
        let d = delivery(Uuid::new_v4(), None);
        let good = token_for(d.id, true);
        let wrong = token_for(Uuid::new_v4(), true);

        assert!(resolve_access(&d, None, Some(&good)).is_ok());
        assert!(resolve_access(&d, None, Some(&wrong)).is_err());
    }
}
