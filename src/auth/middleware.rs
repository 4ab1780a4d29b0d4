use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Verified identity carried by an access token.
///
/// Used directly as a handler argument: extraction fails with 401 unless the
/// request has a valid `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    /// Display name, used as the notification title for direct messages
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

/// JWT secret stored in request extensions for the Claims extractor.
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

/// Why a request could not be authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingToken,
    InvalidToken,
    /// The router was built without the secret-injecting middleware
    MissingSecret,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthRejection::MissingToken => (StatusCode::UNAUTHORIZED, "Missing bearer token"),
            AuthRejection::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthRejection::MissingSecret => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthRejection::MissingToken)?;
        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or(AuthRejection::MissingSecret)?;

        crate::auth::jwt::validate_access_token(&secret.0, token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            AuthRejection::InvalidToken
        })
    }
}
