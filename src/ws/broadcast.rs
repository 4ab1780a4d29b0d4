use axum::extract::ws::Message;

use super::protocol::ServerEvent;
use super::{ConnectionId, ConnectionRegistry};

/// Outcome of pushing one frame to a set of connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Encode a server event into a text frame.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send a frame to each connection. A failed send to one connection is
/// logged and does not stop delivery to the rest.
pub fn send_to_connections<'a, I>(registry: &ConnectionRegistry, connections: I, frame: &Message) -> FanoutOutcome
where
    I: IntoIterator<Item = &'a ConnectionId>,
{
    let mut outcome = FanoutOutcome::default();
    for connection_id in connections {
        match registry.send(*connection_id, frame.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(e) => {
                outcome.failed += 1;
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Emit failed, continuing fan-out"
                );
            }
        }
    }
    outcome
}

/// Send an event to a specific user (all their connections).
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) -> FanoutOutcome {
    let Some(frame) = encode(event) else {
        return FanoutOutcome::default();
    };
    let connections = registry.connections_of(user_id);
    send_to_connections(registry, &connections, &frame)
}
