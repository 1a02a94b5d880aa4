//! HTTP route definitions

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::error;

use crate::app::AppState;
use crate::exchange::SheetError;
use crate::http::handlers::{auth, catalog, documents, exchange, items, kits, logs, scan};
use crate::http::middleware::require_auth;
use crate::session::password::PasswordError;
use crate::store::{items as item_store, StoreError};
use crate::util::time::uptime_secs;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/messages", get(auth::messages))
        .route("/users", get(auth::list_users))
        // Items
        .route("/dashboard", get(items::dashboard))
        .route("/items", post(items::add))
        .route("/items/search", post(items::search))
        .route("/items/undo-last", post(items::undo_last))
        .route("/items/batch-transfer", post(items::batch_transfer))
        .route("/items/batch-delete", post(items::batch_delete))
        .route(
            "/items/:id",
            get(items::details).patch(items::edit).delete(items::delete),
        )
        .route("/items/:id/undo", post(items::undo))
        .route("/items/:id/transfer", post(items::transfer))
        .route(
            "/items/:id/technical",
            get(items::technical).put(items::save_technical),
        )
        .route(
            "/items/:id/documents",
            get(documents::list).post(documents::upload),
        )
        .route("/items/:id/documents/:doc_id", delete(documents::delete))
        // Catalog
        .route(
            "/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route(
            "/categories/:id",
            put(catalog::update_category).delete(catalog::delete_category),
        )
        .route("/categories/:id/prefix", get(catalog::category_prefix))
        .route(
            "/locations",
            get(catalog::list_locations).post(catalog::create_location),
        )
        .route(
            "/locations/:id",
            put(catalog::update_location).delete(catalog::delete_location),
        )
        .route(
            "/projects",
            get(catalog::list_projects).post(catalog::create_project),
        )
        .route(
            "/projects/:id",
            put(catalog::update_project).delete(catalog::delete_project),
        )
        .route("/tags", get(catalog::list_tags).post(catalog::create_tag))
        .route(
            "/tags/:id",
            put(catalog::update_tag).delete(catalog::delete_tag),
        )
        // Kits
        .route("/kits", get(kits::list).post(kits::create))
        .route("/kits/:id", get(kits::detail))
        .route("/kits/:id/items", post(kits::add_item))
        .route("/kits/:id/items/:item_id", delete(kits::remove_item))
        // Logs
        .route("/logs", get(logs::list).delete(logs::clear))
        .route("/logs/export", get(logs::export))
        // Import / export
        .route("/import", post(exchange::import_submit))
        .route("/import/review", get(exchange::import_review))
        .route("/import/save", post(exchange::import_save))
        .route("/import/direct", post(exchange::import_direct))
        .route("/export", get(exchange::export))
        .route("/export/selected", get(exchange::export_selected))
        // Invoice OCR
        .route("/scan", post(scan::scan))
        .route("/scan/save", post(scan::save))
        .route("/scan/clear", post(scan::clear))
        .nest_service("/media", ServeDir::new(state.media.root()))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    // CORS only when client origins are configured (comma-separated in CLIENT_ORIGIN)
    let router = match cors_layer(state.config.client_origin.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    };
    router.with_state(state)
}

fn cors_layer(client_origin: Option<&str>) -> Option<CorsLayer> {
    let allowed_origins: Vec<header::HeaderValue> = client_origin?
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();
    if allowed_origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    live_items: i64,
    active_sessions: usize,
    ocr_enabled: bool,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let live_items = state.db.call(item_store::count_live).await?;

    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        live_items,
        active_sessions: state.sessions.active_sessions(),
        ocr_enabled: state.ocr.is_some(),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

/// Message of a client error, picked up by the auth middleware and queued
/// as a flash message
#[derive(Debug, Clone)]
pub struct ErrorNotice(pub String);

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many attempts, please try again shortly".to_string(),
            ),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        let mut response = (status, Json(body)).into_response();
        if status.is_client_error() {
            response.extensions_mut().insert(ErrorNotice(message));
        }
        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Invalid(msg) => AppError::BadRequest(msg),
            StoreError::Sqlite(_) | StoreError::Task(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<SheetError> for AppError {
    fn from(err: SheetError) -> Self {
        match err {
            SheetError::Unsupported | SheetError::Empty | SheetError::Workbook(_) | SheetError::Csv(_) => {
                AppError::BadRequest(err.to_string())
            }
            SheetError::Xlsx(_) | SheetError::Io(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort => AppError::BadRequest(err.to_string()),
            PasswordError::Hash(msg) | PasswordError::Task(msg) => AppError::Internal(msg),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid upload: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("File storage failed: {}", err))
    }
}
