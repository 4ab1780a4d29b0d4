use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use jsonwebtoken::errors::ErrorKind;
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Browsers cannot set headers on the upgrade request, so the access token
/// travels as `?token=`.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// Close code and reason for a rejected token.
fn close_for(kind: Option<&ErrorKind>) -> (u16, &'static str) {
    match kind {
        Some(ErrorKind::ExpiredSignature) => (CLOSE_TOKEN_EXPIRED, "Token expired"),
        Some(_) => (CLOSE_TOKEN_INVALID, "Token invalid"),
        None => (CLOSE_TOKEN_INVALID, "Token missing"),
    }
}

/// GET /ws?token=JWT
///
/// Always upgrades. A missing or bad token gets a close frame (4001/4002)
/// right away, so clients can tell auth failures from network errors.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match query.token.as_deref() {
        Some(token) => jwt::validate_access_token(&state.jwt_secret, token).map_err(Some),
        None => Err(None),
    };

    match verified {
        Ok(claims) => {
            tracing::info!(user_id = %claims.sub, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims.sub, claims.name))
        }
        Err(err) => {
            let (code, reason) = close_for(err.as_ref().map(|e| e.kind()));
            tracing::warn!(close_code = code, reason = reason, "WebSocket auth failed");

            ws.on_upgrade(move |mut socket| async move {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(frame))).await;
            })
        }
    }
}
