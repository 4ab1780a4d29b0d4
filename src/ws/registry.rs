//! Connection registry: which live connections each user currently has open.
//!
//! Two maps are kept in step: connection -> (owner, sender) and
//! user -> set of connections. Every mutation holds the connection's entry
//! in the first map while it touches the second, so register/unregister of
//! the same connection id are linearized. Lock order is always
//! `connections` then `by_user`.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ConnectionId, ConnectionSender};
use crate::error::{ChatError, ChatResult};

struct ConnectionEntry {
    user_id: String,
    sender: ConnectionSender,
}

#[derive(Default)]
struct RegistryInner {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    by_user: DashMap<String, HashSet<ConnectionId>>,
}

/// Process-wide registry shared by every connection actor. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection_id` as belonging to `user_id`.
    ///
    /// Idempotent per connection id. Re-registering an id under a different
    /// user moves it to the new owner.
    pub fn register(&self, user_id: &str, connection_id: ConnectionId, sender: ConnectionSender) {
        match self.inner.connections.entry(connection_id) {
            Entry::Occupied(mut occupied) => {
                let previous_owner = occupied.get().user_id.clone();
                if previous_owner != user_id {
                    self.detach(&previous_owner, connection_id);
                    tracing::debug!(
                        connection_id = %connection_id,
                        from = %previous_owner,
                        to = %user_id,
                        "Connection re-registered to a different user"
                    );
                }
                self.attach(user_id, connection_id);
                occupied.insert(ConnectionEntry {
                    user_id: user_id.to_string(),
                    sender,
                });
            }
            Entry::Vacant(vacant) => {
                self.attach(user_id, connection_id);
                vacant.insert(ConnectionEntry {
                    user_id: user_id.to_string(),
                    sender,
                });
            }
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = self.connections_of(user_id).len(),
            "Connection registered"
        );
    }

    /// Remove a connection. Unknown ids are a no-op, since transports may
    /// close before setup completes. Returns the previous owner.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<String> {
        let Entry::Occupied(occupied) = self.inner.connections.entry(connection_id) else {
            return None;
        };
        let user_id = occupied.get().user_id.clone();
        self.detach(&user_id, connection_id);
        occupied.remove();

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection unregistered"
        );
        Some(user_id)
    }

    /// Snapshot of the user's open connections (empty if none).
    pub fn connections_of(&self, user_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .by_user
            .get(user_id)
            .map(|set| set.value().clone())
            .unwrap_or_default()
    }

    pub fn owner_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.user_id.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.by_user.contains_key(user_id)
    }

    /// Number of registered connections across all users.
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    /// Push a frame to one connection.
    ///
    /// Fails with `Transport` when the connection is unknown or its writer
    /// task has gone away. Callers fanning out log the error and carry on.
    pub fn send(&self, connection_id: ConnectionId, message: Message) -> ChatResult<()> {
        // Clone the sender so no map guard is held across the send
        let sender = self
            .inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.sender.clone())
            .ok_or_else(|| ChatError::Transport(format!("connection {} not registered", connection_id)))?;

        sender
            .send(message)
            .map_err(|_| ChatError::Transport(format!("connection {} closed", connection_id)))
    }

    fn attach(&self, user_id: &str, connection_id: ConnectionId) {
        self.inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);
    }

    fn detach(&self, user_id: &str, connection_id: ConnectionId) {
        if let Entry::Occupied(mut occupied) = self.inner.by_user.entry(user_id.to_string()) {
            occupied.get_mut().remove(&connection_id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
    }
}
