//! Authentication middleware and session token extraction

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::routes::ErrorNotice;
use crate::session::{FlashLevel, SessionUser, SESSION_COOKIE};

/// Extract the token from an `Authorization: Bearer` header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

/// Session token from the cookie, falling back to the bearer header
pub fn session_token(jar: &CookieJar, request: &Request) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_string)
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Session expired, please log in again")]
    SessionExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "redirect_url": "/login",
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

/// Logged-in user, inserted into request extensions by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub session_id: Uuid,
    pub user_id: i64,
    pub username: String,
    pub is_superuser: bool,
}

impl From<SessionUser> for AuthenticatedUser {
    fn from(user: SessionUser) -> Self {
        Self {
            session_id: user.session_id,
            user_id: user.user_id,
            username: user.username,
            is_superuser: user.is_superuser,
        }
    }
}

/// Middleware to require a live session.
///
/// Client errors raised by the handler are also queued as flash messages.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = session_token(&jar, &request).ok_or(AuthError::MissingToken)?;
    let session_id = state
        .sessions
        .verify_token(&token)
        .ok_or(AuthError::InvalidToken)?;
    let user = state
        .sessions
        .get(session_id)
        .ok_or(AuthError::SessionExpired)?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser::from(user));

    let response = next.run(request).await;
    if let Some(ErrorNotice(message)) = response.extensions().get::<ErrorNotice>() {
        state
            .sessions
            .flash(session_id, FlashLevel::Error, message.clone());
    }
    Ok(response)
}
