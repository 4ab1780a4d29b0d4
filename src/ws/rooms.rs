//! Room membership: which live connections are subscribed to each
//! conversation's real-time events.
//!
//! The manager is permissive: a connection may sit in several rooms at once.
//! Whether a connection keeps a single active room is decided by the
//! connection actor, not here.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::ConnectionId;
use crate::error::{ChatError, ChatResult};

#[derive(Default)]
struct RoomsInner {
    /// conversation id -> connections in the room
    rooms: DashMap<String, HashSet<ConnectionId>>,
    /// connection -> conversation ids it has joined (for leave_all)
    joined: DashMap<ConnectionId, HashSet<String>>,
}

/// Cheap to clone; all clones share the same rooms.
/// Lock order is always `joined` then `rooms`.
#[derive(Clone, Default)]
pub struct RoomManager {
    inner: Arc<RoomsInner>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a conversation's room.
    /// Returns true if the connection was not already in the room.
    pub fn join(&self, connection_id: ConnectionId, conversation_id: &str) -> ChatResult<bool> {
        let conversation_id = require_conversation_id(conversation_id)?;

        let mut joined = self.inner.joined.entry(connection_id).or_default();
        let newly_joined = joined.insert(conversation_id.clone());
        if newly_joined {
            self.inner
                .rooms
                .entry(conversation_id.clone())
                .or_default()
                .insert(connection_id);
        }
        drop(joined);

        tracing::debug!(
            connection_id = %connection_id,
            conversation_id = %conversation_id,
            "Joined room"
        );
        Ok(newly_joined)
    }

    /// Unsubscribe a connection from one room. Leaving a room the connection
    /// is not in is a no-op. Returns true if the connection was in the room.
    pub fn leave(&self, connection_id: ConnectionId, conversation_id: &str) -> ChatResult<bool> {
        let conversation_id = require_conversation_id(conversation_id)?;

        let Entry::Occupied(mut joined) = self.inner.joined.entry(connection_id) else {
            return Ok(false);
        };
        let was_member = joined.get_mut().remove(&conversation_id);
        if was_member {
            self.remove_from_room(&conversation_id, connection_id);
        }
        if joined.get().is_empty() {
            joined.remove();
        }
        Ok(was_member)
    }

    /// Remove a connection from every room it joined. Called synchronously
    /// from disconnect handling. Returns the rooms that were left.
    pub fn leave_all(&self, connection_id: ConnectionId) -> Vec<String> {
        let Entry::Occupied(joined) = self.inner.joined.entry(connection_id) else {
            return Vec::new();
        };
        let rooms: Vec<String> = joined.get().iter().cloned().collect();
        for conversation_id in &rooms {
            self.remove_from_room(conversation_id, connection_id);
        }
        joined.remove();

        if !rooms.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                rooms = rooms.len(),
                "Left all rooms"
            );
        }
        rooms
    }

    /// Snapshot of the connections currently in a room.
    pub fn members_in_room(&self, conversation_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .rooms
            .get(conversation_id)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the rooms a connection is in.
    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<String> {
        self.inner
            .joined
            .get(&connection_id)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }

    fn remove_from_room(&self, conversation_id: &str, connection_id: ConnectionId) {
        if let Entry::Occupied(mut room) = self.inner.rooms.entry(conversation_id.to_string()) {
            room.get_mut().remove(&connection_id);
            if room.get().is_empty() {
                room.remove();
            }
        }
    }
}

fn require_conversation_id(conversation_id: &str) -> ChatResult<String> {
    let conversation_id = conversation_id.trim();
    if conversation_id.is_empty() {
        return Err(ChatError::Validation("conversationId is required".to_string()));
    }
    Ok(conversation_id.to_string())
}
