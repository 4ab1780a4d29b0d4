//! Chat event broadcast helpers.
//! Wraps chat events in server frames and sends them to the right connections.

use crate::chat::presence::TypingEvent;
use crate::db::models::Conversation;
use crate::ws::broadcast::{encode, send_to_connections, send_to_user, FanoutOutcome};
use crate::ws::protocol::{ServerEvent, TypingPayload};
use crate::ws::{ConnectionRegistry, RoomManager};

/// Broadcast a typing transition to everyone in the conversation's room
/// except the typing user's own connections.
pub fn broadcast_typing(
    registry: &ConnectionRegistry,
    rooms: &RoomManager,
    event: &TypingEvent,
) -> FanoutOutcome {
    let payload = TypingPayload {
        conversation_id: event.conversation_id().to_string(),
        user_id: event.user_id().to_string(),
    };
    let server_event = match event {
        TypingEvent::Started { .. } => ServerEvent::Typing(payload),
        TypingEvent::Stopped { .. } => ServerEvent::StopTyping(payload),
    };
    let Some(frame) = encode(&server_event) else {
        return FanoutOutcome::default();
    };

    let targets: Vec<_> = rooms
        .members_in_room(event.conversation_id())
        .into_iter()
        .filter(|connection_id| {
            registry.owner_of(*connection_id).as_deref() != Some(event.user_id())
        })
        .collect();

    send_to_connections(registry, &targets, &frame)
}

/// Send a ConversationUpdated event to every member of the conversation,
/// plus any former member passed in `also_notify` (e.g. a removed user).
pub fn broadcast_conversation_update(
    registry: &ConnectionRegistry,
    conversation: &Conversation,
    also_notify: Option<&str>,
) {
    let event = ServerEvent::ConversationUpdated(conversation.clone());
    for member in &conversation.members {
        send_to_user(registry, member, &event);
    }
    if let Some(user_id) = also_notify {
        if !conversation.is_member(user_id) {
            send_to_user(registry, user_id, &event);
        }
    }
}
