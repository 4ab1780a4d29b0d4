//! Message send pipeline and REST endpoints.
//!
//! Both `POST /api/messages` and the WebSocket `new message` event go through
//! [`send_and_deliver`]: persist first, then fan out. A message that fails to
//! persist is never delivered.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::Message;
use crate::error::{ChatError, ChatResult};
use crate::state::AppState;

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub content: String,
}

/// Persist a message from `sender_id` and deliver it to the other members.
///
/// The sender's typing indicator for the conversation is cleared, since a
/// sent message ends the typing burst.
pub async fn send_and_deliver(
    state: &AppState,
    sender_id: &str,
    sender_name: &str,
    conversation_id: &str,
    content: &str,
) -> ChatResult<Message> {
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ChatError::Validation(format!(
            "message content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }

    let persisted = state
        .store
        .append_message(conversation_id, sender_id, sender_name, content)
        .await?;

    state.typing.stop_typing(&persisted.message.conversation_id, sender_id);

    let report = state
        .router
        .deliver(&persisted.message, &persisted.conversation)
        .await;
    if report.failed_emits > 0 || report.failed_notifications > 0 {
        tracing::warn!(
            message_id = %persisted.message.id,
            failed_emits = report.failed_emits,
            failed_notifications = report.failed_notifications,
            "Message persisted with partial delivery"
        );
    }

    Ok(persisted.message)
}

/// POST /api/messages
/// Send a message as the authenticated user.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let message = send_and_deliver(&state, &claims.sub, &claims.name, &body.conversation_id, &body.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/chats/{id}/messages
/// Message history for a conversation the caller belongs to, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let messages = state.store.list_messages(&conversation_id, &claims.sub).await?;
    Ok(Json(messages))
}
