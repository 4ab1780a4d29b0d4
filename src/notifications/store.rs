use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};

use super::{truncate_chars, NewNotification, NotificationSink, PREVIEW_MAX_CHARS, TITLE_MAX_CHARS};
use crate::db::models::{Notification, NotificationKind};
use crate::db::{now_timestamp, DbPool};
use crate::error::{ChatError, ChatResult};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, title, preview, kind, reference_id, is_read, created_at, updated_at";

/// SQLite-backed notification records. Every read and update is scoped to
/// the owning user; another user's notification id behaves as missing.
#[derive(Clone)]
pub struct NotificationStore {
    db: DbPool,
}

impl NotificationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| ChatError::StoreUnavailable("database lock poisoned".to_string()))?;
            f(&conn)
        })
        .await?
    }

    pub async fn create(&self, new: NewNotification) -> ChatResult<Notification> {
        if new.user_id.trim().is_empty() {
            return Err(ChatError::Validation("userId is required".to_string()));
        }
        let title = truncate_chars(&new.title, TITLE_MAX_CHARS);
        if title.is_empty() {
            return Err(ChatError::Validation("notification title is required".to_string()));
        }
        let now = now_timestamp();
        let notification = Notification {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: new.user_id,
            title,
            preview: truncate_chars(&new.preview, PREVIEW_MAX_CHARS),
            kind: new.kind,
            reference_id: new.reference_id,
            is_read: false,
            created_at: now.clone(),
            updated_at: now,
        };

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, title, preview, kind, reference_id, is_read, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
                params![
                    notification.id,
                    notification.user_id,
                    notification.title,
                    notification.preview,
                    notification.kind.as_str(),
                    notification.reference_id,
                    notification.created_at,
                    notification.updated_at
                ],
            )?;
            Ok(notification)
        })
        .await
    }

    /// The user's notifications, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> ChatResult<Vec<Notification>> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id], notification_from_row)?;
            let notifications = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(notifications)
        })
        .await
    }

    pub async fn unread_count(&self, user_id: &str) -> ChatResult<i64> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// Mark one notification read or unread.
    pub async fn set_read(&self, user_id: &str, notification_id: &str, read: bool) -> ChatResult<Notification> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE notifications SET is_read = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![read, now_timestamp(), notification_id, user_id],
            )?;
            if updated == 0 {
                return Err(ChatError::NotFound("Notification"));
            }
            load_notification(conn, &notification_id)?.ok_or(ChatError::NotFound("Notification"))
        })
        .await
    }

    /// Mark every unread notification of the user read. Returns how many changed.
    pub async fn mark_all_read(&self, user_id: &str) -> ChatResult<usize> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE notifications SET is_read = 1, updated_at = ?1 WHERE user_id = ?2 AND is_read = 0",
                params![now_timestamp(), user_id],
            )?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete(&self, user_id: &str, notification_id: &str) -> ChatResult<()> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                params![notification_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ChatError::NotFound("Notification"));
            }
            Ok(())
        })
        .await
    }

    /// Delete notifications created before `cutoff`. Returns how many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> ChatResult<usize> {
        let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM notifications WHERE created_at < ?1",
                params![cutoff],
            )?;
            Ok(deleted)
        })
        .await
    }
}

impl NotificationSink for NotificationStore {
    fn notify(&self, notification: NewNotification) -> BoxFuture<'_, ChatResult<Notification>> {
        Box::pin(self.create(notification))
    }
}

fn load_notification(conn: &Connection, notification_id: &str) -> ChatResult<Option<Notification>> {
    let notification = conn
        .query_row(
            &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
            params![notification_id],
            notification_from_row,
        )
        .optional()?;
    Ok(notification)
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(4)?;
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        preview: row.get(3)?,
        kind: NotificationKind::from_str(&kind).unwrap_or(NotificationKind::System),
        reference_id: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
