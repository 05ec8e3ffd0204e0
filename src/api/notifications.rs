use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::ok;
use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/read-all", put(read_all))
        .route("/notifications/:id/read", put(mark_read))
}

async fn list(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Value>, AppError> {
    let rows = state.store.notifications_for(principal.user_id);
    let unread = rows.iter().filter(|n| !n.is_read).count();

    Ok(Json(json!({
        "success": true,
        "notifications": rows,
        "unread_count": unread,
    })))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut entry = state
        .store
        .notifications
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;

    if entry.user_id != principal.user_id {
        return Err(AppError::Forbidden(
            "not your notification".to_string(),
        ));
    }
    if !entry.is_read {
        entry.is_read = true;
        entry.read_at = Some(Utc::now());
    }

    Ok(ok("notification", json!(entry.value().clone())))
}

async fn read_all(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Value>, AppError> {
    let ids: Vec<Uuid> = state
        .store
        .notifications_for(principal.user_id)
        .into_iter()
        .filter(|n| !n.is_read)
        .map(|n| n.id)
        .collect();

    let now = Utc::now();
    for id in &ids {
        if let Some(mut entry) = state.store.notifications.get_mut(id) {
            entry.is_read = true;
            entry.read_at = Some(now);
        }
    }

    Ok(Json(json!({ "success": true, "marked_read": ids.len() })))
}
