use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A single frame on the push channel.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
}

/// Topic fan-out to currently connected subscribers. At-most-once: the
/// bus never queues for absent subscribers; clients recover missed state
/// from the store on reconnect. Admission control lives at the socket
/// boundary, which re-checks authorization on every subscribe.
pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<Envelope>>,
    capacity: usize,
}

pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn delivery_topic(delivery_id: Uuid) -> String {
    format!("delivery:{delivery_id}")
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn publish(&self, topic: &str, event: &str, data: Value) {
        let envelope = Envelope {
            event: event.to_string(),
            data,
        };

        if let Some(sender) = self.topics.get(topic) {
            // No receivers is fine; drop the topic entry lazily so the
            // registry does not grow without bound.
            if sender.send(envelope).is_err() {
                drop(sender);
                self.topics
                    .remove_if(topic, |_, sender| sender.receiver_count() == 0);
            }
        }
    }
}
