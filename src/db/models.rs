//! Row types for the conversation, message and notification tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs and
//! double as the JSON shapes returned by the REST API.

use serde::{Deserialize, Serialize};

/// A direct (exactly two members) or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub is_group: bool,
    /// Required for groups, absent for direct conversations
    pub name: Option<String>,
    /// Set iff `is_group`; initially the creator
    pub admin: Option<String>,
    /// Member user ids, in join order
    pub members: Vec<String>,
    pub latest_message_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

/// Conversation list entry with the latest message for preview ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub latest_message: Option<Message>,
}

/// A persisted chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

/// Notification kinds accepted by the notifications table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    System,
    Alert,
    Reminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::System => "system",
            Self::Alert => "alert",
            Self::Reminder => "reminder",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "system" => Some(Self::System),
            "alert" => Some(Self::Alert),
            "reminder" => Some(Self::Reminder),
            _ => None,
        }
    }
}

/// Durable notification record for a user who missed a live delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub preview: String,
    pub kind: NotificationKind,
    pub reference_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub updated_at: String,
}
