//! Durable notifications for recipients who were offline when a message
//! was delivered, plus the user-facing notification API.

pub mod retention;
pub mod routes;
pub mod store;

use futures_util::future::BoxFuture;

use crate::db::models::{Notification, NotificationKind};
use crate::error::ChatResult;

pub use store::NotificationStore;

/// Maximum notification title length (chars).
pub const TITLE_MAX_CHARS: usize = 100;
/// Maximum notification preview length (chars).
pub const PREVIEW_MAX_CHARS: usize = 200;

/// A notification about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub preview: String,
    pub kind: NotificationKind,
    /// Id of the entity the notification points at (the conversation for messages)
    pub reference_id: Option<String>,
}

/// Where the message router hands off recipients with no live connection.
///
/// Implementations must be safe to call concurrently. A failure is reported
/// to the caller, which logs it; it never undoes the persisted message.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: NewNotification) -> BoxFuture<'_, ChatResult<Notification>>;
}

/// Cut `text` to at most `max` characters, marking the cut with "…".
pub fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push('…');
    cut
}
