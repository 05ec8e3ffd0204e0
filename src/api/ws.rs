use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::stream::SplitStream;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{self, Principal};
use crate::error::AppError;
use crate::events::bus::{delivery_topic, user_topic};
use crate::models::tracking::TrackingToken;
use crate::state::AppState;
use crate::tracking;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    tracking_token: Option<String>,
}

/// Connect-time identity: a bearer-authenticated user or a tracking-token
/// holder scoped to one delivery.
enum WsIdentity {
    User(Principal),
    Tracking(TrackingToken),
}

/// Authentication happens before the upgrade; a bad credential never
/// gets a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match authenticate(&state, &query) {
        Ok(identity) => identity,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

fn authenticate(state: &AppState, query: &WsQuery) -> Result<WsIdentity, AppError> {
    if let Some(token) = &query.token {
        return auth::verify_token(&state.jwt_secret, token).map(WsIdentity::User);
    }
    if let Some(raw) = &query.tracking_token {
        return tracking::validate(&state.store, raw).map(WsIdentity::Tracking);
    }
    Err(AppError::Auth(
        "missing bearer token or tracking token".to_string(),
    ))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: WsIdentity) {
    state.metrics.ws_connections.inc();
    info!("realtime client connected");

    let (mut ws_tx, ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let hello = match &identity {
        WsIdentity::User(principal) => json!({
            "authenticated": true,
            "user_id": principal.user_id,
            "role": principal.role,
        }),
        WsIdentity::Tracking(token) => json!({
            "authenticated": true,
            "delivery_id": token.delivery_id,
            "is_recipient": token.is_recipient,
        }),
    };
    let _ = out_tx.send(frame("auth_response", hello));

    // Forwarder tasks per subscribed topic, keyed so repeat subscribes
    // stay idempotent.
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    let initial_topic = match &identity {
        WsIdentity::User(principal) => user_topic(principal.user_id),
        WsIdentity::Tracking(token) => delivery_topic(token.delivery_id),
    };
    subscribe_topic(&state, &mut subscriptions, &out_tx, &initial_topic);

    let send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    recv_loop(ws_rx, &state, &identity, &mut subscriptions, &out_tx).await;

    send_task.abort();
    for (_, handle) in subscriptions {
        handle.abort();
    }
    state.metrics.ws_connections.dec();
    info!("realtime client disconnected");
}

async fn recv_loop(
    mut ws_rx: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    identity: &WsIdentity,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
    out_tx: &mpsc::UnboundedSender<String>,
) {
    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&text) else {
            let _ = out_tx.send(error_frame("invalid frame: expected JSON"));
            continue;
        };

        match value["action"].as_str() {
            Some("subscribe") => {
                let Some(topic) = value["topic"].as_str() else {
                    let _ = out_tx.send(error_frame("subscribe requires a topic"));
                    continue;
                };
                // Admission is re-checked on every subscribe.
                match authorize_topic(state, identity, topic) {
                    Ok(()) => {
                        subscribe_topic(state, subscriptions, out_tx, topic);
                        let _ = out_tx.send(frame("subscribed", json!({ "topic": topic })));
                    }
                    Err(err) => {
                        let _ = out_tx.send(error_frame(&err.to_string()));
                    }
                }
            }
            Some("typing") => {
                let Some(delivery_id) = value["delivery_id"]
                    .as_str()
                    .and_then(|s| s.parse::<Uuid>().ok())
                else {
                    let _ = out_tx.send(error_frame("typing requires a delivery_id"));
                    continue;
                };
                let topic = delivery_topic(delivery_id);
                if authorize_topic(state, identity, &topic).is_ok() {
                    state.bus.publish(
                        &topic,
                        "typing_indicator",
                        json!({
                            "delivery_id": delivery_id,
                            "from": typing_source(identity),
                        }),
                    );
                }
            }
            _ => {
                let _ = out_tx.send(error_frame("unknown action"));
            }
        }
    }
}

/// Room admission: `user:{id}` needs that exact bearer identity;
/// `delivery:{id}` admits the sender, the assigned courier, or a token
/// bound to the delivery.
fn authorize_topic(
    state: &AppState,
    identity: &WsIdentity,
    topic: &str,
) -> Result<(), AppError> {
    if let Some(raw) = topic.strip_prefix("user:") {
        let user_id: Uuid = raw
            .parse()
            .map_err(|_| AppError::Validation("malformed topic".to_string()))?;
        return match identity {
            WsIdentity::User(principal) if principal.user_id == user_id => Ok(()),
            _ => Err(AppError::Forbidden("not your personal topic".to_string())),
        };
    }

    if let Some(raw) = topic.strip_prefix("delivery:") {
        let delivery_id: Uuid = raw
            .parse()
            .map_err(|_| AppError::Validation("malformed topic".to_string()))?;
        return match identity {
            WsIdentity::User(principal) => {
                let delivery = state.store.get_delivery(delivery_id)?;
                if delivery.sender_id == principal.user_id
                    || delivery.courier_id == Some(principal.user_id)
                {
                    Ok(())
                } else {
                    Err(AppError::Forbidden(
                        "not a participant of this delivery".to_string(),
                    ))
                }
            }
            WsIdentity::Tracking(token) if token.delivery_id == delivery_id => Ok(()),
            WsIdentity::Tracking(_) => Err(AppError::Forbidden(
                "token is bound to another delivery".to_string(),
            )),
        };
    }

    Err(AppError::Validation(format!("unknown topic {topic:?}")))
}

fn subscribe_topic(
    state: &Arc<AppState>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
    out_tx: &mpsc::UnboundedSender<String>,
    topic: &str,
) {
    if subscriptions.contains_key(topic) {
        return;
    }

    let mut rx = state.bus.subscribe(topic);
    let out_tx = out_tx.clone();
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if out_tx.send(frame(&envelope.event, envelope.data)).is_err() {
                        break;
                    }
                }
                // Lagged subscribers just miss frames; state is
                // recoverable from the store.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "realtime subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    subscriptions.insert(topic.to_string(), handle);
}

fn typing_source(identity: &WsIdentity) -> Value {
    match identity {
        WsIdentity::User(principal) => json!({ "user_id": principal.user_id }),
        WsIdentity::Tracking(_) => json!({ "recipient": true }),
    }
}

fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn error_frame(message: &str) -> String {
    frame("error", json!({ "message": message }))
}
