use std::ops::ControlFlow;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionId, ConnectionSender};

/// Heartbeat cadence. A ping without a pong inside `PONG_TIMEOUT` closes the connection.
const PING_INTERVAL: Duration = Duration::from_secs(30);

const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection state, owned by the connection's reader loop.
/// Created on upgrade and dropped on disconnect.
pub struct ConnectionSession {
    pub connection_id: ConnectionId,
    /// Verified identity from the access token
    pub user_id: String,
    pub display_name: String,
    pub sender: ConnectionSender,
    /// Set once the client has sent `setup` and the connection is in the registry
    pub registered: bool,
    /// Conversation the client is currently viewing
    pub active_room: Option<String>,
}

impl ConnectionSession {
    pub fn new(user_id: String, display_name: String, sender: ConnectionSender) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            display_name,
            sender,
            registered: false,
            active_room: None,
        }
    }
}

/// Drive one authenticated WebSocket until it closes.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel (the sender half is what the registry hands out for fan-out),
/// a heartbeat task pings the client, and this task reads frames one at a
/// time so a connection's own events are handled in arrival order.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String, display_name: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();

    let mut session = ConnectionSession::new(user_id, display_name, tx.clone());
    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "WebSocket actor started"
    );

    let writer = tokio::spawn(writer_task(ws_sender, rx));
    let heartbeat = tokio::spawn(heartbeat_task(tx, pong_rx));

    while let Some(frame) = ws_receiver.next().await {
        let flow = match frame {
            Ok(message) => handle_frame(message, &mut session, &state, &pong_tx).await,
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, error = %e, "WebSocket receive error");
                ControlFlow::Break(())
            }
        };
        if flow.is_break() {
            break;
        }
    }

    writer.abort();
    heartbeat.abort();
    disconnect(&state, &session);

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "WebSocket actor stopped"
    );
}

async fn handle_frame(
    message: Message,
    session: &mut ConnectionSession,
    state: &AppState,
    pong_tx: &mpsc::UnboundedSender<()>,
) -> ControlFlow<()> {
    match message {
        Message::Text(text) => protocol::handle_text_message(text.as_str(), session, state).await,
        Message::Binary(data) => {
            tracing::debug!(
                user_id = %session.user_id,
                bytes = data.len(),
                "Ignoring binary frame, events are JSON text"
            );
        }
        Message::Pong(_) => {
            let _ = pong_tx.send(());
        }
        Message::Ping(data) => {
            let _ = session.sender.send(Message::Pong(data));
        }
        Message::Close(frame) => {
            tracing::info!(user_id = %session.user_id, reason = ?frame, "Client initiated close");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Ping every `PING_INTERVAL`; close the connection if no pong follows
/// within `PONG_TIMEOUT`. Ends when the writer is gone.
async fn heartbeat_task(tx: ConnectionSender, mut pong_rx: mpsc::UnboundedReceiver<()>) {
    let mut ticker = interval(PING_INTERVAL);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if tx.send(Message::Ping(Vec::new().into())).is_err() {
            return;
        }
        if !matches!(timeout(PONG_TIMEOUT, pong_rx.recv()).await, Ok(Some(()))) {
            tracing::warn!("Pong timeout, closing connection");
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: 1001,
                reason: "Pong timeout".into(),
            })));
            return;
        }
    }
}

/// Disconnect handling: drop the connection from every room and from the
/// registry before returning, so no lookup observes a dead connection after
/// this point. Typing state is cleared once the user's last connection goes.
pub fn disconnect(state: &AppState, session: &ConnectionSession) {
    state.rooms.leave_all(session.connection_id);
    state.connections.unregister(session.connection_id);

    if !state.connections.is_online(&session.user_id) {
        state.typing.clear_user(&session.user_id);
    }
}

async fn writer_task(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
}
