//! Message fan-out.
//!
//! Given a persisted message and the membership snapshot taken when it was
//! persisted, every recipient (members minus the sender) is reached exactly
//! once through one of three paths:
//!
//! 1. room broadcast, to their connections currently viewing the conversation;
//! 2. direct delivery to all their open connections, when none is in the room;
//! 3. a notification record, when they have no live connection at all.
//!
//! The sender never receives an echo, even on other devices joined to the room.
//! Emit failures on individual connections are logged and skipped; a failing
//! notification sink never affects the already persisted message.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::db::models::{Conversation, Message, NotificationKind};
use crate::notifications::{truncate_chars, NewNotification, NotificationSink, TITLE_MAX_CHARS};
use crate::ws::broadcast::{encode, send_to_connections};
use crate::ws::protocol::{DeliveredMessage, ServerEvent};
use crate::ws::{ConnectionRegistry, RoomManager};

/// Who was reached, and how, by one `deliver` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients reached through the conversation's room
    pub room: Vec<String>,
    /// Recipients online but not viewing the conversation
    pub elsewhere: Vec<String>,
    /// Recipients with no live connection, for whom a notification was stored
    pub notified: Vec<String>,
    /// Connection-level emits that failed
    pub failed_emits: usize,
    /// Recipients whose notification could not be stored
    pub failed_notifications: usize,
}

#[derive(Clone)]
pub struct MessageRouter {
    connections: ConnectionRegistry,
    rooms: RoomManager,
    sink: Arc<dyn NotificationSink>,
    preview_chars: usize,
}

impl MessageRouter {
    pub fn new(
        connections: ConnectionRegistry,
        rooms: RoomManager,
        sink: Arc<dyn NotificationSink>,
        preview_chars: usize,
    ) -> Self {
        Self {
            connections,
            rooms,
            sink,
            preview_chars,
        }
    }

    /// Fan a persisted message out to `conversation.members` minus the sender.
    ///
    /// `conversation` must be the snapshot returned by the store alongside
    /// the persisted message, not a client-supplied copy.
    pub async fn deliver(&self, message: &Message, conversation: &Conversation) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let recipients: BTreeSet<&str> = conversation
            .members
            .iter()
            .map(String::as_str)
            .filter(|member| *member != message.sender_id)
            .collect();
        if recipients.is_empty() {
            return report;
        }

        let event = ServerEvent::MessageReceived(DeliveredMessage {
            message: message.clone(),
            conversation: conversation.clone(),
        });
        let frame = encode(&event);

        // Room broadcast, restricted to connections owned by recipients
        let room_connections = self.rooms.members_in_room(&message.conversation_id);
        let mut in_room: HashSet<String> = HashSet::new();
        let mut room_targets = Vec::new();
        for connection_id in &room_connections {
            let Some(owner) = self.connections.owner_of(*connection_id) else {
                continue;
            };
            if recipients.contains(owner.as_str()) {
                room_targets.push(*connection_id);
                in_room.insert(owner);
            }
        }
        if let Some(frame) = &frame {
            report.failed_emits += send_to_connections(&self.connections, &room_targets, frame).failed;
        }

        let mut offline = Vec::new();
        for recipient in &recipients {
            if in_room.contains(*recipient) {
                report.room.push(recipient.to_string());
                continue;
            }

            let connections = self.connections.connections_of(recipient);
            if connections.is_empty() {
                offline.push(recipient.to_string());
                continue;
            }

            // Online but viewing something else: push to every device
            if let Some(frame) = &frame {
                report.failed_emits += send_to_connections(&self.connections, &connections, frame).failed;
            }
            report.elsewhere.push(recipient.to_string());
        }

        for user_id in offline {
            let notification = self.notification_for(&user_id, message, conversation);
            match self.sink.notify(notification).await {
                Ok(_) => report.notified.push(user_id),
                Err(e) => {
                    report.failed_notifications += 1;
                    tracing::warn!(
                        user_id = %user_id,
                        message_id = %message.id,
                        error = %e,
                        "Failed to record notification for offline recipient"
                    );
                }
            }
        }

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            room = report.room.len(),
            elsewhere = report.elsewhere.len(),
            notified = report.notified.len(),
            failed_emits = report.failed_emits,
            "Message delivered"
        );

        report
    }

    fn notification_for(&self, user_id: &str, message: &Message, conversation: &Conversation) -> NewNotification {
        // Display names come from the token unchecked; the sender id is never empty
        let sender = match message.sender_name.trim() {
            "" => message.sender_id.as_str(),
            name => name,
        };
        let title = match (conversation.is_group, &conversation.name) {
            (true, Some(name)) if !name.trim().is_empty() => name.as_str(),
            _ => sender,
        };
        NewNotification {
            user_id: user_id.to_string(),
            title: truncate_chars(title, TITLE_MAX_CHARS),
            preview: truncate_chars(&message.content, self.preview_chars),
            kind: NotificationKind::Message,
            reference_id: Some(message.conversation_id.clone()),
        }
    }
}
