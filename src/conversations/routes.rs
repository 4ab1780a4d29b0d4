//! REST endpoints for conversations and group membership.
//!
//! Every change to membership or naming is pushed to the affected users'
//! live connections as a `conversation updated` event after it is stored.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::broadcast::broadcast_conversation_update;
use crate::db::models::{Conversation, ConversationSummary};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectChatRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameGroupRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

/// POST /api/chats
/// Find or create the direct conversation between the caller and `userId`.
/// Responds 201 when the conversation was created, 200 when it already existed.
pub async fn access_direct(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<DirectChatRequest>,
) -> Result<(StatusCode, Json<Conversation>), ChatError> {
    let (conversation, created) = state
        .store
        .find_or_create_direct(&claims.sub, &body.user_id)
        .await?;

    if created {
        tracing::info!(
            conversation_id = %conversation.id,
            user_id = %claims.sub,
            peer_id = %body.user_id,
            "Direct conversation created"
        );
        broadcast_conversation_update(&state.connections, &conversation, None);
        return Ok((StatusCode::CREATED, Json(conversation)));
    }
    Ok((StatusCode::OK, Json(conversation)))
}

/// GET /api/chats
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    Ok(Json(state.store.find_by_member(&claims.sub).await?))
}

/// POST /api/chats/group
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Conversation>), ChatError> {
    let conversation = state.store.create_group(&claims.sub, &body.name).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/chats/search?search=
/// Groups whose name contains the keyword and which the caller has not joined.
pub async fn search_groups(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Conversation>>, ChatError> {
    Ok(Json(state.store.search_groups(&claims.sub, &query.search).await?))
}

/// GET /api/chats/search-all?search=
/// The caller's own conversations: groups by name, direct chats by peer id.
pub async fn search_own(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    Ok(Json(state.store.search_own(&claims.sub, &query.search).await?))
}

/// PUT /api/chats/{id}/join
pub async fn join_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation = state.store.join_group(&conversation_id, &claims.sub).await?;
    broadcast_conversation_update(&state.connections, &conversation, None);
    Ok(Json(conversation))
}

/// PUT /api/chats/{id}/rename
pub async fn rename_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Json(body): Json<RenameGroupRequest>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation = state
        .store
        .rename_group(&conversation_id, &claims.sub, &body.name)
        .await?;
    broadcast_conversation_update(&state.connections, &conversation, None);
    Ok(Json(conversation))
}

/// POST /api/chats/{id}/members
/// Admin adds a user to the group.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation = state
        .store
        .add_member(&conversation_id, &claims.sub, &body.user_id)
        .await?;
    broadcast_conversation_update(&state.connections, &conversation, None);
    Ok(Json(conversation))
}

/// DELETE /api/chats/{id}/members/{user_id}
/// Leave (when `user_id` is the caller) or remove another member (admin only).
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path((conversation_id, user_id)): Path<(String, String)>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation = state
        .store
        .remove_member(&conversation_id, &claims.sub, &user_id)
        .await?;

    if !conversation.is_member(&user_id) {
        for connection_id in state.connections.connections_of(&user_id) {
            state.rooms.leave(connection_id, &conversation.id)?;
        }
        state.typing.stop_typing(&conversation.id, &user_id);
    }
    broadcast_conversation_update(&state.connections, &conversation, Some(&user_id));
    Ok(Json(conversation))
}
