use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::ok;
use crate::auth;
use crate::chat;
use crate::error::AppError;
use crate::models::tracking::TrackingToken;
use crate::state::AppState;
use crate::tracking;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages/:id", get(history).post(send))
        .route("/messages/:id/read", put(mark_read))
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(default)]
    tracking_token: Option<String>,
}

/// Either credential works: bearer JWT or a live tracking token.
fn credentials(
    state: &AppState,
    headers: &HeaderMap,
    query: &TokenQuery,
) -> Result<(Option<Uuid>, Option<TrackingToken>), AppError> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Auth("malformed authorization header".to_string()))?;
        let principal = auth::verify_token(&state.jwt_secret, token)?;
        return Ok((Some(principal.user_id), None));
    }

    if let Some(raw) = &query.tracking_token {
        let token = tracking::validate(&state.store, raw)?;
        return Ok((None, Some(token)));
    }

    Err(AppError::Auth(
        "missing bearer token or tracking token".to_string(),
    ))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let (user, token) = credentials(&state, &headers, &query)?;
    let delivery = state.store.get_delivery(delivery_id)?;
    let access = chat::resolve_access(&delivery, user, token.as_ref())?;

    let messages = chat::history(&state, &delivery, &access);
    Ok(ok("messages", json!(messages)))
}

#[derive(Deserialize)]
struct SendRequest {
    content: String,
    #[serde(default)]
    attachment_url: Option<String>,
}

async fn send(
    State(state): State<Arc<AppState>>,
    Path(delivery_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Json(payload): Json<SendRequest>,
) -> Result<Json<Value>, AppError> {
    let (user, token) = credentials(&state, &headers, &query)?;
    let delivery = state.store.get_delivery(delivery_id)?;
    let access = chat::resolve_access(&delivery, user, token.as_ref())?;

    let message = chat::send(
        &state,
        &delivery,
        &access,
        payload.content,
        payload.attachment_url,
    )?;
    Ok(ok("message", json!(message)))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let (user, token) = credentials(&state, &headers, &query)?;
    let message = chat::mark_read(&state, message_id, user, token.as_ref())?;
    Ok(ok("message", json!(message)))
}
