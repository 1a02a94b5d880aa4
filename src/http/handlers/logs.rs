//! Audit log listing, export and clearing

use axum::{
    extract::{Extension, Query, State},
    response::{Json, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{attachment, flash, MessageResponse};
use crate::app::AppState;
use crate::exchange::{export, ExportFormat};
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::logs::{self as store, actions, LogEntry, LogFilter, NewLog};
use crate::store::users::{self, User};
use crate::store::{Page, PageRequest};

/// Raw query string; malformed values are ignored rather than rejected
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    user: Option<String>,
    action: Option<String>,
    item_name: Option<String>,
    uid_number: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
    format: Option<String>,
}

impl LogQuery {
    fn filter(&self) -> LogFilter {
        fn date(raw: &Option<String>) -> Option<NaiveDate> {
            raw.as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
        }
        LogFilter {
            user: self.user.as_deref().and_then(|u| u.trim().parse().ok()),
            action: self.action.clone(),
            item_name: self.item_name.clone(),
            uid_number: self.uid_number.clone(),
            start_date: date(&self.start_date),
            end_date: date(&self.end_date),
        }
    }
}

#[derive(Serialize)]
pub struct LogsResponse {
    #[serde(flatten)]
    page: Page<LogEntry>,
    users: Vec<User>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogsResponse>, AppError> {
    let filter = query.filter();
    let page = PageRequest::parse(query.page.as_deref(), query.page_size.as_deref());
    let (page, users) = state
        .db
        .call(move |conn| Ok((store::list(conn, &filter, page)?, users::list(conn)?)))
        .await?;
    Ok(Json(LogsResponse { page, users }))
}

/// Filtered logs as a spreadsheet download
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Response, AppError> {
    let filter = query.filter();
    let format = ExportFormat::parse(query.format.as_deref());
    let entries = state
        .db
        .call(move |conn| store::all(conn, &filter))
        .await?;
    let count = entries.len();
    let bytes = export::logs_table(entries).write(format)?;
    info!(count, "Logs exported");
    Ok(attachment(
        bytes,
        format.content_type(),
        &export::file_name("inventory_logs", format.extension()),
    ))
}

/// Superusers only
pub async fn clear(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MessageResponse>, AppError> {
    if !auth.is_superuser {
        warn!(user_id = auth.user_id, "Non-superuser tried to clear logs");
        return Err(AppError::Forbidden(
            "Only superusers can clear the logs.".to_string(),
        ));
    }

    let user_id = auth.user_id;
    let username = auth.username.clone();
    let removed = state
        .db
        .transaction(move |tx| {
            let removed = store::clear_all(tx)?;
            store::record(
                tx,
                &NewLog::new(
                    Some(user_id),
                    actions::LOGS_CLEARED,
                    format!("All logs were cleared by {}.", username),
                ),
            )?;
            Ok(removed)
        })
        .await?;

    info!(removed, "Logs cleared");
    flash(&state, &auth, FlashLevel::Success, "All logs have been cleared.");
    Ok(Json(
        MessageResponse::new("All logs have been cleared.").redirect("/logs"),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn filters_and_pages() {
        let app = TestApp::new(false).await;
        for name in ["Desk", "Lamp", "Desk lamp"] {
            app.json("POST", "/items", json!({ "item_name": name })).await;
        }
        let (status, body) = app
            .get("/logs?action=item_added&item_name=desk&page_size=5&start_date=bogus")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["page_size"], 5);
        assert_eq!(body["items"][0]["username"], "tester");
    }

    #[tokio::test]
    async fn only_superusers_clear() {
        let app = TestApp::new(false).await;
        let (status, _) = app.json("DELETE", "/logs", json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = TestApp::new(true).await;
        admin.json("POST", "/items", json!({ "item_name": "Desk" })).await;
        let (status, _) = admin.json("DELETE", "/logs", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = admin.get("/logs").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["action"], "logs_cleared");
    }

    #[tokio::test]
    async fn export_is_an_xlsx_attachment() {
        let app = TestApp::new(false).await;
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/logs/export")
                    .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("inventory_logs_"));
        assert!(disposition.ends_with(".xlsx\""));
    }
}
