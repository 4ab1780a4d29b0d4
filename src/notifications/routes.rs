//! REST endpoints for the caller's notifications.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::db::models::Notification;
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

/// GET /api/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Notification>>, ChatError> {
    Ok(Json(state.notifications.list_for_user(&claims.sub).await?))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCountResponse>, ChatError> {
    let unread = state.notifications.unread_count(&claims.sub).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// PATCH /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<Json<Notification>, ChatError> {
    Ok(Json(state.notifications.set_read(&claims.sub, &notification_id, true).await?))
}

/// PATCH /api/notifications/{id}/unread
pub async fn mark_unread(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<Json<Notification>, ChatError> {
    Ok(Json(state.notifications.set_read(&claims.sub, &notification_id, false).await?))
}

/// PATCH /api/notifications/mark-all-read
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<MarkAllReadResponse>, ChatError> {
    let updated = state.notifications.mark_all_read(&claims.sub).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<StatusCode, ChatError> {
    state.notifications.delete(&claims.sub, &notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
