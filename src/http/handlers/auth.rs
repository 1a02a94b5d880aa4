//! Registration, login, logout and flash messages

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::MessageResponse;
use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::password;
use crate::session::{FlashMessage, SESSION_COOKIE};
use crate::store::logs::{self as log_store, actions, NewLog};
use crate::store::users::{self, NewUser, User};

#[derive(Deserialize)]
pub struct RegisterRequest {
    username: String,
    #[serde(default)]
    email: Option<String>,
    password: String,
    #[serde(default)]
    password_confirm: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    user: User,
    token: String,
    redirect_url: &'static str,
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionResponse>), AppError> {
    if let Some(confirm) = &req.password_confirm {
        if confirm != &req.password {
            return Err(AppError::BadRequest("Passwords do not match".to_string()));
        }
    }
    let password_hash = password::hash(req.password).await?;
    let new_user = NewUser {
        username: req.username,
        email: req.email,
        password_hash,
        is_superuser: false,
    };

    let user = state
        .db
        .transaction(move |tx| {
            let user = users::create(tx, &new_user)?;
            log_store::record(
                tx,
                &NewLog::new(
                    Some(user.id),
                    actions::REGISTER,
                    format!("User '{}' registered.", user.username),
                ),
            )?;
            Ok(user)
        })
        .await?;

    info!(user_id = user.id, "User registered");
    let token = state.sessions.create(&user);
    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token.clone())),
        Json(SessionResponse {
            user,
            token,
            redirect_url: "/dashboard",
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    if state.login_limiter.check().is_err() {
        warn!("Login rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }

    let username = req.username.trim().to_string();
    let lookup = username.clone();
    let credentials = state
        .db
        .call(move |conn| users::find_credentials(conn, &lookup))
        .await?;

    let verified = match credentials {
        Some((user, hash)) => password::verify(req.password, hash).await.then_some(user),
        None => None,
    };
    let user = match verified {
        Some(user) => user,
        None => {
            let details = format!("Failed login attempt for username '{}'.", username);
            state
                .db
                .call(move |conn| {
                    log_store::record(conn, &NewLog::new(None, actions::LOGIN_FAILED, details))
                })
                .await?;
            warn!(username = %username, "Login failed");
            return Err(AppError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }
    };

    let user_id = user.id;
    state
        .db
        .call(move |conn| {
            log_store::record(
                conn,
                &NewLog::new(Some(user_id), actions::LOGIN, "User logged in successfully."),
            )
        })
        .await?;

    info!(user_id, "User logged in");
    let token = state.sessions.create(&user);
    Ok((
        jar.add(session_cookie(token.clone())),
        Json(SessionResponse {
            user,
            token,
            redirect_url: "/dashboard",
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<MessageResponse>), AppError> {
    let user_id = auth.user_id;
    state
        .db
        .call(move |conn| {
            log_store::record(
                conn,
                &NewLog::new(Some(user_id), actions::LOGOUT, "User logged out."),
            )
        })
        .await?;
    state.sessions.remove(auth.session_id);
    info!(user_id, "User logged out");

    Ok((
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(MessageResponse::new("You have been logged out.").redirect("/login")),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<User>, AppError> {
    let user_id = auth.user_id;
    let user = state
        .db
        .call(move |conn| users::get(conn, user_id))
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    Ok(Json(user))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.db.call(users::list).await?))
}

#[derive(Serialize)]
pub struct MessagesResponse {
    messages: Vec<FlashMessage>,
}

/// Drain queued flash messages
pub async fn messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<MessagesResponse> {
    Json(MessagesResponse {
        messages: state.sessions.take_flash(auth.session_id),
    })
}

/// Create the configured superuser unless that username already exists
pub async fn bootstrap_admin(state: &AppState) -> Result<(), AppError> {
    let (Some(username), Some(admin_password)) = (
        state.config.admin_username.clone(),
        state.config.admin_password.clone(),
    ) else {
        return Ok(());
    };
    let password_hash = password::hash(admin_password).await?;
    let created = state
        .db
        .transaction(move |tx| {
            if users::username_exists(tx, &username)? {
                return Ok(None);
            }
            users::create(
                tx,
                &NewUser {
                    username,
                    email: None,
                    password_hash,
                    is_superuser: true,
                },
            )
            .map(Some)
        })
        .await?;
    if let Some(user) = created {
        info!(user_id = user.id, username = %user.username, "Superuser created");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_login_sets_cookie() {
        let app = TestApp::new(false).await;
        let (status, body) = app
            .send(post_json(
                "/auth/register",
                json!({ "username": "bob", "password": "longenough", "email": "bob@example.com" }),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "bob");

        let response = tower::ServiceExt::oneshot(
            app.router.clone(),
            post_json("/auth/login", json!({ "username": "bob", "password": "longenough" })),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("session_id="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized_and_logged() {
        let app = TestApp::new(false).await;
        let (status, _) = app
            .send(post_json(
                "/auth/login",
                json!({ "username": "tester", "password": "nope-nope" }),
            ))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, logs) = app.get("/logs?action=login_failed").await;
        assert_eq!(logs["total"], 1);
    }

    #[tokio::test]
    async fn short_passwords_are_rejected() {
        let app = TestApp::new(false).await;
        let (status, body) = app
            .send(post_json("/auth/register", json!({ "username": "x", "password": "short" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("8 characters"));
    }

    #[tokio::test]
    async fn protected_routes_need_a_session() {
        let app = TestApp::new(false).await;
        let (status, _) = app
            .send(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.get("/auth/me").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "tester");
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let app = TestApp::new(false).await;
        let (status, _) = app.json("POST", "/auth/logout", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get("/auth/me").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
