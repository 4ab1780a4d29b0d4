//! Typing indicators.
//!
//! Transient per-(conversation, user) state with a debounce window. Every
//! `start_typing` re-arms the window; the pair returns to "not typing" on an
//! explicit stop or once the window passes without a new start. Transitions
//! are published on an mpsc channel which [`spawn_typing_fanout`] turns into
//! room broadcasts. Nothing here is persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::chat::broadcast::broadcast_typing;
use crate::ws::{ConnectionRegistry, RoomManager};

/// Default debounce window.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    Started { conversation_id: String, user_id: String },
    Stopped { conversation_id: String, user_id: String },
}

impl TypingEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Started { conversation_id, .. } | Self::Stopped { conversation_id, .. } => conversation_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Started { user_id, .. } | Self::Stopped { user_id, .. } => user_id,
        }
    }
}

type TypingKey = (String, String);

struct TypingState {
    /// Distinguishes the timer armed by the latest start from stale ones
    generation: u64,
    expires_at: Instant,
}

struct PresenceInner {
    states: DashMap<TypingKey, TypingState>,
    window: Duration,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<TypingEvent>,
}

#[derive(Clone)]
pub struct PresenceCoordinator {
    inner: Arc<PresenceInner>,
}

impl PresenceCoordinator {
    /// Create a coordinator and the receiving end of its transition stream.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<TypingEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            inner: Arc::new(PresenceInner {
                states: DashMap::new(),
                window,
                next_generation: AtomicU64::new(0),
                events,
            }),
        };
        (coordinator, rx)
    }

    /// Mark the user as typing and (re)arm the expiry timer. Only the
    /// not-typing -> typing transition emits `Started`.
    pub fn start_typing(&self, conversation_id: &str, user_id: &str) {
        let key = (conversation_id.to_string(), user_id.to_string());
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + self.inner.window;
        let state = TypingState {
            generation,
            expires_at,
        };

        // Emit under the entry lock so transitions for one key are published in order
        match self.inner.states.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(state);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(state);
                self.emit(TypingEvent::Started {
                    conversation_id: key.0.clone(),
                    user_id: key.1.clone(),
                });
            }
        }

        let weak: Weak<PresenceInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some(inner) = weak.upgrade() {
                PresenceCoordinator { inner }.expire(key, generation);
            }
        });
    }

    /// Clear typing state. Returns false (and emits nothing) when the user
    /// was not typing, so a stop racing an expiry is reported once.
    pub fn stop_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        let key = (conversation_id.to_string(), user_id.to_string());
        match self.inner.states.entry(key) {
            Entry::Occupied(occupied) => {
                let ((conversation_id, user_id), _) = occupied.remove_entry();
                self.emit(TypingEvent::Stopped {
                    conversation_id,
                    user_id,
                });
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn is_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        let key = (conversation_id.to_string(), user_id.to_string());
        self.inner
            .states
            .get(&key)
            .is_some_and(|state| state.expires_at > Instant::now())
    }

    /// Stop every typing indicator the user has (e.g. their last connection closed).
    pub fn clear_user(&self, user_id: &str) {
        let conversations: Vec<String> = self
            .inner
            .states
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.key().0.clone())
            .collect();
        for conversation_id in conversations {
            self.stop_typing(&conversation_id, user_id);
        }
    }

    fn expire(&self, key: TypingKey, generation: u64) {
        if let Entry::Occupied(occupied) = self.inner.states.entry(key) {
            // A later start re-armed the window; its own timer will handle it
            if occupied.get().generation != generation {
                return;
            }
            let ((conversation_id, user_id), _) = occupied.remove_entry();
            tracing::debug!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                "Typing indicator expired"
            );
            self.emit(TypingEvent::Stopped {
                conversation_id,
                user_id,
            });
        }
    }

    fn emit(&self, event: TypingEvent) {
        if self.inner.events.send(event).is_err() {
            tracing::debug!("Typing fan-out receiver dropped, event discarded");
        }
    }
}

/// Forward typing transitions to the conversation's room, excluding the
/// typing user's own connections.
pub fn spawn_typing_fanout(
    mut rx: mpsc::UnboundedReceiver<TypingEvent>,
    connections: ConnectionRegistry,
    rooms: RoomManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            broadcast_typing(&connections, &rooms, &event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TypingEvent>) -> Vec<TypingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn stopped(conversation_id: &str, user_id: &str) -> TypingEvent {
        TypingEvent::Stopped {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_start_emits_single_stop_after_last_call() {
        let (presence, mut rx) = PresenceCoordinator::new(Duration::from_secs(3));

        presence.start_typing("c1", "alice");
        tokio::time::sleep(Duration::from_secs(2)).await;
        presence.start_typing("c1", "alice");
        tokio::time::sleep(Duration::from_secs(2)).await;
        presence.start_typing("c1", "alice");

        // 4s after the first call: the window keeps being refreshed
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TypingEvent::Started { .. }));
        assert!(presence.is_typing("c1", "alice"));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drain(&mut rx), vec![stopped("c1", "alice")]);
        assert!(!presence.is_typing("c1", "alice"));

        // No late duplicate from the superseded timers
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_emits_once() {
        let (presence, mut rx) = PresenceCoordinator::new(Duration::from_secs(3));

        presence.start_typing("c1", "alice");
        assert!(presence.stop_typing("c1", "alice"));
        assert!(!presence.stop_typing("c1", "alice"));

        // The armed timer must not emit a second stop
        tokio::time::sleep(Duration::from_secs(5)).await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], stopped("c1", "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairs_are_independent() {
        let (presence, mut rx) = PresenceCoordinator::new(Duration::from_secs(3));

        presence.start_typing("c1", "alice");
        presence.start_typing("c1", "bob");
        presence.start_typing("c2", "alice");
        presence.stop_typing("c1", "bob");

        assert!(presence.is_typing("c1", "alice"));
        assert!(!presence.is_typing("c1", "bob"));
        assert!(presence.is_typing("c2", "alice"));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let stops = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TypingEvent::Stopped { .. }))
            .count();
        assert_eq!(stops, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_user_stops_all_conversations() {
        let (presence, mut rx) = PresenceCoordinator::new(Duration::from_secs(3));
        presence.start_typing("c1", "alice");
        presence.start_typing("c2", "alice");
        presence.start_typing("c1", "bob");
        drain(&mut rx);

        presence.clear_user("alice");
        let mut events = drain(&mut rx);
        events.sort_by(|a, b| a.conversation_id().cmp(b.conversation_id()));
        assert_eq!(events, vec![stopped("c1", "alice"), stopped("c2", "alice")]);
        assert!(presence.is_typing("c1", "bob"));
    }
}
