use axum::{
    extract::State,
    middleware,
    routing::{get, patch, post, put},
    Json, Router,
};

use crate::auth::middleware::JwtSecret;
use crate::chat::messages;
use crate::conversations::routes as conversations;
use crate::notifications::routes as notifications;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.len(),
    }))
}

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let chat_routes = Router::new()
        .route(
            "/api/chats",
            post(conversations::access_direct).get(conversations::list_conversations),
        )
        .route("/api/chats/group", post(conversations::create_group))
        .route("/api/chats/search", get(conversations::search_groups))
        .route("/api/chats/search-all", get(conversations::search_own))
        .route("/api/chats/{id}/join", put(conversations::join_group))
        .route("/api/chats/{id}/rename", put(conversations::rename_group))
        .route("/api/chats/{id}/members", post(conversations::add_member))
        .route(
            "/api/chats/{id}/members/{user_id}",
            axum::routing::delete(conversations::remove_member),
        )
        .route("/api/chats/{id}/messages", get(messages::list_messages))
        .route("/api/messages", post(messages::send_message));

    let notification_routes = Router::new()
        .route("/api/notifications", get(notifications::list_notifications))
        .route("/api/notifications/unread-count", get(notifications::unread_count))
        .route("/api/notifications/mark-all-read", patch(notifications::mark_all_read))
        .route("/api/notifications/{id}/read", patch(notifications::mark_read))
        .route("/api/notifications/{id}/unread", patch(notifications::mark_unread))
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(notifications::delete_notification),
        );

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler::ws_upgrade))
        .merge(chat_routes)
        .merge(notification_routes)
        .layer(middleware::from_fn_with_state(state.clone(), inject_jwt_secret))
        .with_state(state)
}
