use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by conversation, messaging and notification operations.
///
/// Registry, room and presence operations are idempotent and do not
/// produce errors for unknown connections; only operations that require
/// an entity to exist report `NotFound`.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("User is already a member of this conversation")]
    AlreadyMember,

    #[error("This is not a group conversation")]
    NotAGroup,

    #[error("User is not a member of this conversation")]
    NotAMember,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transport emit failed: {0}")]
    Transport(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::AlreadyMember => StatusCode::CONFLICT,
            ChatError::NotAGroup => StatusCode::BAD_REQUEST,
            ChatError::NotAMember => StatusCode::FORBIDDEN,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Store and transport details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            ChatError::Transport(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::StoreUnavailable(format!("blocking task failed: {}", err))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ChatError::StoreUnavailable(detail) = &self {
            tracing::error!(error = %detail, "Store call failed");
        }
        let message = self.public_message();

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
