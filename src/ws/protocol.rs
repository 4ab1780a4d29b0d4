//! JSON event protocol spoken over the WebSocket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`. Client events are
//! decoded into [`ClientEvent`] and dispatched against the connection's
//! [`ConnectionSession`]; replies and pushes are [`ServerEvent`]s.

use serde::{Deserialize, Serialize};

use super::actor::ConnectionSession;
use super::broadcast::encode;
use crate::chat::messages::send_and_deliver;
use crate::db::models::{Conversation, Message};
use crate::error::{ChatError, ChatResult};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce the user behind this connection.
    #[serde(rename = "setup")]
    Setup(SetupPayload),
    #[serde(rename = "join room", alias = "join chat")]
    JoinRoom(String),
    #[serde(rename = "leave room", alias = "leave chat")]
    LeaveRoom(String),
    #[serde(rename = "typing")]
    Typing(String),
    #[serde(rename = "stop typing")]
    StopTyping(String),
    #[serde(rename = "new message")]
    NewMessage(NewMessagePayload),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    #[serde(alias = "id", alias = "_id")]
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub conversation_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "room joined")]
    RoomJoined(String),
    #[serde(rename = "room left")]
    RoomLeft(String),
    #[serde(rename = "message received")]
    MessageReceived(DeliveredMessage),
    /// Ack to the sending connection once its message is persisted
    #[serde(rename = "message sent")]
    MessageSent(Message),
    #[serde(rename = "typing")]
    Typing(TypingPayload),
    #[serde(rename = "stop typing")]
    StopTyping(TypingPayload),
    #[serde(rename = "conversation updated")]
    ConversationUpdated(Conversation),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

/// A message plus the conversation (with members) it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    #[serde(flatten)]
    pub message: Message,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

impl ServerEvent {
    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: err.status().as_u16(),
            message: err.public_message(),
        })
    }
}

/// Handle an incoming text frame: decode, dispatch, reply on error.
pub async fn handle_text_message(text: &str, session: &mut ConnectionSession, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %session.user_id,
                connection_id = %session.connection_id,
                error = %e,
                "Failed to decode client event"
            );
            reply(
                session,
                &ServerEvent::Error(ErrorPayload {
                    code: 400,
                    message: "Invalid event".to_string(),
                }),
            );
            return;
        }
    };

    if let Err(err) = dispatch_event(event, session, state).await {
        tracing::debug!(
            user_id = %session.user_id,
            connection_id = %session.connection_id,
            error = %err,
            "Client event rejected"
        );
        reply(session, &ServerEvent::error(&err));
    }
}

async fn dispatch_event(
    event: ClientEvent,
    session: &mut ConnectionSession,
    state: &AppState,
) -> ChatResult<()> {
    match event {
        ClientEvent::Setup(payload) => handle_setup(payload, session, state),
        _ if !session.registered => Err(ChatError::Forbidden("setup required".to_string())),
        ClientEvent::JoinRoom(conversation_id) => handle_join_room(&conversation_id, session, state).await,
        ClientEvent::LeaveRoom(conversation_id) => {
            state.rooms.leave(session.connection_id, &conversation_id)?;
            if session.active_room.as_deref() == Some(conversation_id.as_str()) {
                session.active_room = None;
            }
            reply(session, &ServerEvent::RoomLeft(conversation_id));
            Ok(())
        }
        ClientEvent::Typing(conversation_id) => {
            require_non_empty(&conversation_id)?;
            if !state.rooms.rooms_of(session.connection_id).contains(&conversation_id) {
                return Err(ChatError::NotAMember);
            }
            state.typing.start_typing(&conversation_id, &session.user_id);
            Ok(())
        }
        ClientEvent::StopTyping(conversation_id) => {
            require_non_empty(&conversation_id)?;
            state.typing.stop_typing(&conversation_id, &session.user_id);
            Ok(())
        }
        ClientEvent::NewMessage(payload) => {
            let message = send_and_deliver(
                state,
                &session.user_id,
                &session.display_name,
                &payload.conversation_id,
                &payload.content,
            )
            .await?;
            reply(session, &ServerEvent::MessageSent(message));
            Ok(())
        }
    }
}

fn handle_setup(payload: SetupPayload, session: &mut ConnectionSession, state: &AppState) -> ChatResult<()> {
    if payload.user_id != session.user_id {
        return Err(ChatError::Forbidden(
            "setup user does not match authenticated user".to_string(),
        ));
    }

    state
        .connections
        .register(&session.user_id, session.connection_id, session.sender.clone());
    session.registered = true;

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "User setup complete"
    );
    reply(session, &ServerEvent::Connected);
    Ok(())
}

async fn handle_join_room(
    conversation_id: &str,
    session: &mut ConnectionSession,
    state: &AppState,
) -> ChatResult<()> {
    let conversation = state.store.require(conversation_id).await?;
    if !conversation.is_member(&session.user_id) {
        return Err(ChatError::NotAMember);
    }

    if state.settings.single_room_per_connection {
        if let Some(previous) = session.active_room.take() {
            if previous != conversation.id {
                state.rooms.leave(session.connection_id, &previous)?;
            }
        }
    }

    state.rooms.join(session.connection_id, &conversation.id)?;
    session.active_room = Some(conversation.id.clone());

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        conversation_id = %conversation.id,
        "Joined conversation room"
    );
    reply(session, &ServerEvent::RoomJoined(conversation.id));
    Ok(())
}

fn require_non_empty(conversation_id: &str) -> ChatResult<()> {
    if conversation_id.trim().is_empty() {
        return Err(ChatError::Validation("conversationId is required".to_string()));
    }
    Ok(())
}

/// Send an event straight to this connection's writer.
fn reply(session: &ConnectionSession, event: &ServerEvent) {
    if let Some(frame) = encode(event) {
        let _ = session.sender.send(frame);
    }
}
