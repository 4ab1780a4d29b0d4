use std::sync::Arc;

use crate::chat::presence::{spawn_typing_fanout, PresenceCoordinator};
use crate::chat::MessageRouter;
use crate::config::ChatSettings;
use crate::conversations::ConversationStore;
use crate::db::DbPool;
use crate::notifications::NotificationStore;
use crate::ws::{ConnectionRegistry, RoomManager};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Conversations, membership and messages
    pub store: ConversationStore,
    /// Offline notification records
    pub notifications: NotificationStore,
    /// Live WebSocket connections per user
    pub connections: ConnectionRegistry,
    /// Which connections are viewing which conversation
    pub rooms: RoomManager,
    /// Typing indicators
    pub typing: PresenceCoordinator,
    /// Fan-out of persisted messages
    pub router: MessageRouter,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    pub settings: Arc<ChatSettings>,
}

impl AppState {
    /// Wire the chat core together over one database and spawn the typing
    /// fan-out task. Must be called inside a tokio runtime.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, settings: ChatSettings) -> Self {
        let store = ConversationStore::new(db.clone());
        let notifications = NotificationStore::new(db);
        let connections = ConnectionRegistry::new();
        let rooms = RoomManager::new();

        let (typing, typing_events) = PresenceCoordinator::new(settings.typing_timeout);
        spawn_typing_fanout(typing_events, connections.clone(), rooms.clone());

        let router = MessageRouter::new(
            connections.clone(),
            rooms.clone(),
            Arc::new(notifications.clone()),
            settings.preview_chars,
        );

        Self {
            store,
            notifications,
            connections,
            rooms,
            typing,
            router,
            jwt_secret,
            settings: Arc::new(settings),
        }
    }
}
