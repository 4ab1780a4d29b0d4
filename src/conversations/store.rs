//! Durable conversation, membership and message storage.
//!
//! Direct conversations are keyed by a canonical member pair (`direct_key`,
//! smaller id first) carrying a UNIQUE constraint, so find-or-create is an
//! insert-or-ignore followed by a re-read and concurrent first contact between
//! the same two users converges on one row. Membership rules (exactly two
//! members for direct conversations, admin-only changes for groups) are
//! enforced here rather than by callers.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Conversation, ConversationSummary, Message};
use crate::db::{now_timestamp, DbPool};
use crate::error::{ChatError, ChatResult};

/// Maximum results returned by group search.
const GROUP_SEARCH_LIMIT: i64 = 10;

/// A message that has been durably persisted, together with the membership
/// snapshot of its conversation taken in the same critical section.
#[derive(Debug, Clone)]
pub struct PersistedMessage {
    pub message: Message,
    pub conversation: Conversation,
}

#[derive(Clone)]
pub struct ConversationStore {
    db: DbPool,
}

impl ConversationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&mut Connection) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| ChatError::StoreUnavailable("database lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await?
    }

    /// Return the direct conversation between `user_a` and `user_b`,
    /// creating it on first contact. The bool is true when a row was created.
    pub async fn find_or_create_direct(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> ChatResult<(Conversation, bool)> {
        let user_a = require_id(user_a, "userId")?;
        let user_b = require_id(user_b, "userId")?;
        if user_a == user_b {
            return Err(ChatError::Validation(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        self.run(move |conn| {
            let key = direct_key(&user_a, &user_b);
            let now = now_timestamp();
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO conversations (id, is_group, direct_key, created_at, updated_at)
                 VALUES (?1, 0, ?2, ?3, ?3)",
                params![uuid::Uuid::now_v7().to_string(), key, now],
            )?;

            let id: String = tx.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                params![key],
                |row| row.get(0),
            )?;

            if inserted == 1 {
                for member in [&user_a, &user_b] {
                    tx.execute(
                        "INSERT INTO conversation_members (conversation_id, user_id, joined_at)
                         VALUES (?1, ?2, ?3)",
                        params![id, member, now],
                    )?;
                }
            }

            tx.commit()?;

            let conversation = load_conversation(conn, &id)?.ok_or(ChatError::NotFound("Conversation"))?;
            Ok((conversation, inserted == 1))
        })
        .await
    }

    /// All conversations `user_id` belongs to, most recently updated first,
    /// each with its latest message for list previews.
    pub async fn find_by_member(&self, user_id: &str) -> ChatResult<Vec<ConversationSummary>> {
        self.search_own(user_id, "").await
    }

    /// The caller's own conversations matching `keyword` (case-insensitive):
    /// groups by name, direct conversations by the other participant's id.
    /// An empty keyword matches every conversation. Most recent first.
    pub async fn search_own(&self, user_id: &str, keyword: &str) -> ChatResult<Vec<ConversationSummary>> {
        let user_id = require_id(user_id, "userId")?;
        let keyword = keyword.trim().to_lowercase();

        self.run(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT c.id FROM conversations c
                     JOIN conversation_members m ON m.conversation_id = c.id AND m.user_id = ?1
                     WHERE ?2 = ''
                        OR (c.is_group = 1 AND instr(lower(c.name), ?2) > 0)
                        OR (c.is_group = 0 AND EXISTS (
                            SELECT 1 FROM conversation_members p
                            WHERE p.conversation_id = c.id
                              AND p.user_id <> ?1
                              AND instr(lower(p.user_id), ?2) > 0
                        ))
                     ORDER BY c.updated_at DESC, c.rowid DESC",
                )?;
                let rows = stmt.query_map(params![user_id, keyword], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };

            let mut summaries = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(conversation) = load_conversation(conn, &id)? else {
                    continue;
                };
                let latest_message = match &conversation.latest_message_id {
                    Some(message_id) => load_message(conn, message_id)?,
                    None => None,
                };
                summaries.push(ConversationSummary {
                    conversation,
                    latest_message,
                });
            }
            Ok(summaries)
        })
        .await
    }

    pub async fn get(&self, conversation_id: &str) -> ChatResult<Option<Conversation>> {
        let conversation_id = conversation_id.to_string();
        self.run(move |conn| load_conversation(conn, &conversation_id))
            .await
    }

    /// Like [`get`](Self::get) but reports a missing conversation as `NotFound`.
    pub async fn require(&self, conversation_id: &str) -> ChatResult<Conversation> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        self.get(&conversation_id)
            .await?
            .ok_or(ChatError::NotFound("Conversation"))
    }

    /// Create a group whose only member and admin is `creator`.
    pub async fn create_group(&self, creator: &str, name: &str) -> ChatResult<Conversation> {
        let creator = require_id(creator, "userId")?;
        let name = require_name(name)?;

        self.run(move |conn| {
            let id = uuid::Uuid::now_v7().to_string();
            let now = now_timestamp();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, is_group, name, admin_id, created_at, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?4, ?4)",
                params![id, name, creator, now],
            )?;
            tx.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![id, creator, now],
            )?;
            tx.commit()?;

            tracing::info!(conversation_id = %id, creator = %creator, "Group created");
            load_conversation(conn, &id)?.ok_or(ChatError::NotFound("Conversation"))
        })
        .await
    }

    /// Self-join a group.
    pub async fn join_group(&self, conversation_id: &str, user_id: &str) -> ChatResult<Conversation> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let user_id = require_id(user_id, "userId")?;

        self.run(move |conn| {
            let conversation = existing_group(conn, &conversation_id)?;
            if conversation.is_member(&user_id) {
                return Err(ChatError::AlreadyMember);
            }
            insert_member(conn, &conversation_id, &user_id)?;
            load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))
        })
        .await
    }

    /// Add `user_id` to a group on behalf of `actor`, who must be the admin.
    pub async fn add_member(
        &self,
        conversation_id: &str,
        actor: &str,
        user_id: &str,
    ) -> ChatResult<Conversation> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let actor = require_id(actor, "userId")?;
        let user_id = require_id(user_id, "userId")?;

        self.run(move |conn| {
            let conversation = existing_group(conn, &conversation_id)?;
            if conversation.admin.as_deref() != Some(actor.as_str()) {
                return Err(ChatError::Forbidden(
                    "only the group admin can add members".to_string(),
                ));
            }
            if conversation.is_member(&user_id) {
                return Err(ChatError::AlreadyMember);
            }
            insert_member(conn, &conversation_id, &user_id)?;
            load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))
        })
        .await
    }

    /// Remove `user_id` from a group. Members may always remove themselves;
    /// removing someone else requires `actor` to be the admin. Removing a
    /// non-member is a no-op. If the admin leaves, the earliest-joined
    /// remaining member takes over.
    pub async fn remove_member(
        &self,
        conversation_id: &str,
        actor: &str,
        user_id: &str,
    ) -> ChatResult<Conversation> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let actor = require_id(actor, "userId")?;
        let user_id = require_id(user_id, "userId")?;

        self.run(move |conn| {
            let conversation = existing_group(conn, &conversation_id)?;
            let is_admin = conversation.admin.as_deref() == Some(actor.as_str());
            if actor != user_id && !is_admin {
                return Err(ChatError::Forbidden(
                    "only the group admin can remove other members".to_string(),
                ));
            }
            if !conversation.is_member(&user_id) {
                return Ok(conversation);
            }

            let now = now_timestamp();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
            )?;
            if conversation.admin.as_deref() == Some(user_id.as_str()) {
                let successor: Option<String> = tx
                    .query_row(
                        "SELECT user_id FROM conversation_members
                         WHERE conversation_id = ?1
                         ORDER BY joined_at ASC, rowid ASC LIMIT 1",
                        params![conversation_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "UPDATE conversations SET admin_id = ?1 WHERE id = ?2",
                    params![successor, conversation_id],
                )?;
            }
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id],
            )?;
            tx.commit()?;

            tracing::info!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                removed_by = %actor,
                "Member removed from group"
            );
            load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))
        })
        .await
    }

    /// Rename a group. Any member may rename.
    pub async fn rename_group(
        &self,
        conversation_id: &str,
        actor: &str,
        name: &str,
    ) -> ChatResult<Conversation> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let actor = require_id(actor, "userId")?;
        let name = require_name(name)?;

        self.run(move |conn| {
            let conversation = existing_group(conn, &conversation_id)?;
            if !conversation.is_member(&actor) {
                return Err(ChatError::NotAMember);
            }
            conn.execute(
                "UPDATE conversations SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now_timestamp(), conversation_id],
            )?;
            load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))
        })
        .await
    }

    /// Groups whose name contains `keyword` (case-insensitive) that `user_id`
    /// has not joined yet. An empty keyword matches every group.
    pub async fn search_groups(&self, user_id: &str, keyword: &str) -> ChatResult<Vec<Conversation>> {
        let user_id = require_id(user_id, "userId")?;
        let keyword = keyword.trim().to_lowercase();

        self.run(move |conn| {
            let ids: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT id FROM conversations
                     WHERE is_group = 1
                       AND (?2 = '' OR instr(lower(name), ?2) > 0)
                       AND id NOT IN (
                           SELECT conversation_id FROM conversation_members WHERE user_id = ?1
                       )
                     ORDER BY updated_at DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![user_id, keyword, GROUP_SEARCH_LIMIT], |row| {
                    row.get(0)
                })?;
                rows.collect::<Result<_, _>>()?
            };

            let mut groups = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(conversation) = load_conversation(conn, &id)? {
                    groups.push(conversation);
                }
            }
            Ok(groups)
        })
        .await
    }

    /// Persist a message and bump the conversation's latest message.
    ///
    /// The returned membership snapshot is read under the same lock as the
    /// insert, so it is the authoritative recipient list for fan-out.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
    ) -> ChatResult<PersistedMessage> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let sender_id = require_id(sender_id, "userId")?;
        let sender_name = sender_name.to_string();
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(ChatError::Validation("message content is required".to_string()));
        }

        self.run(move |conn| {
            let conversation =
                load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))?;
            if !conversation.is_member(&sender_id) {
                return Err(ChatError::NotAMember);
            }

            let message = Message {
                id: uuid::Uuid::now_v7().to_string(),
                conversation_id: conversation_id.clone(),
                sender_id,
                sender_name,
                content,
                created_at: now_timestamp(),
            };

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, sender_name, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.conversation_id,
                    message.sender_id,
                    message.sender_name,
                    message.content,
                    message.created_at
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET latest_message_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![message.id, message.created_at, conversation_id],
            )?;
            tx.commit()?;

            let conversation =
                load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))?;
            Ok(PersistedMessage {
                message,
                conversation,
            })
        })
        .await
    }

    /// Messages of a conversation, oldest first. `viewer` must be a member.
    pub async fn list_messages(&self, conversation_id: &str, viewer: &str) -> ChatResult<Vec<Message>> {
        let conversation_id = require_id(conversation_id, "conversationId")?;
        let viewer = viewer.to_string();

        self.run(move |conn| {
            let conversation =
                load_conversation(conn, &conversation_id)?.ok_or(ChatError::NotFound("Conversation"))?;
            if !conversation.is_member(&viewer) {
                return Err(ChatError::NotAMember);
            }

            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, sender_name, content, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}

/// Canonical key for the unordered pair {a, b}. Length-prefixed so that
/// ids containing the separator cannot collide.
fn direct_key(user_a: &str, user_b: &str) -> String {
    let (lo, hi) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}{}", lo.len(), lo, hi)
}

fn require_id(value: &str, field: &str) -> ChatResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ChatError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn require_name(name: &str) -> ChatResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("group name is required".to_string()));
    }
    Ok(name.to_string())
}

fn existing_group(conn: &Connection, conversation_id: &str) -> ChatResult<Conversation> {
    let conversation =
        load_conversation(conn, conversation_id)?.ok_or(ChatError::NotFound("Conversation"))?;
    if !conversation.is_group {
        return Err(ChatError::NotAGroup);
    }
    Ok(conversation)
}

fn insert_member(conn: &Connection, conversation_id: &str, user_id: &str) -> ChatResult<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO conversation_members (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![conversation_id, user_id, now],
    )?;
    conn.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![now, conversation_id],
    )?;
    Ok(())
}

fn load_conversation(conn: &Connection, conversation_id: &str) -> ChatResult<Option<Conversation>> {
    let row = conn
        .query_row(
            "SELECT id, is_group, name, admin_id, latest_message_id, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    is_group: row.get(1)?,
                    name: row.get(2)?,
                    admin: row.get(3)?,
                    members: Vec::new(),
                    latest_message_id: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()?;

    let Some(mut conversation) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM conversation_members
         WHERE conversation_id = ?1
         ORDER BY joined_at ASC, rowid ASC",
    )?;
    let members = stmt.query_map(params![conversation_id], |row| row.get(0))?;
    conversation.members = members.collect::<Result<_, _>>()?;

    Ok(Some(conversation))
}

fn load_message(conn: &Connection, message_id: &str) -> ChatResult<Option<Message>> {
    Ok(conn
        .query_row(
            "SELECT id, conversation_id, sender_id, sender_name, content, created_at
             FROM messages WHERE id = ?1",
            params![message_id],
            message_from_row,
        )
        .optional()?)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}
