//! Spreadsheet import (reviewed and direct) and inventory export

use axum::{
    extract::{Extension, Multipart, Query, State},
    response::{Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{attachment, flash, load_catalogs, parse_id_list, Catalogs, MultipartForm};
use crate::app::AppState;
use crate::exchange::export;
use crate::exchange::import::{self, ImportReport, ReviewRow, SaveRow};
use crate::exchange::{ExportFormat, Sheet, SheetFormat};
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::items;
use crate::store::logs::{self as log_store, actions, NewLog};
use crate::store::StoreError;

/// Read the uploaded `file` field as a sheet
async fn uploaded_sheet(multipart: Multipart) -> Result<(String, Sheet), AppError> {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form
        .take_file("file")
        .ok_or_else(|| AppError::BadRequest("Choose a spreadsheet to import".to_string()))?;
    let format = SheetFormat::from_filename(&file.file_name)?;
    let sheet = Sheet::read(&file.bytes, format)?;
    Ok((file.file_name, sheet))
}

// ============================================================================
// Reviewed import
// ============================================================================

#[derive(Serialize)]
pub struct ImportSubmitted {
    message: String,
    row_count: usize,
    redirect_url: &'static str,
}

/// Parse the upload and keep the rows on the session for review
pub async fn import_submit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    multipart: Multipart,
) -> Result<Json<ImportSubmitted>, AppError> {
    let (file_name, sheet) = uploaded_sheet(multipart).await?;
    let user_id = auth.user_id;
    let rows = state
        .db
        .call(move |conn| {
            let rows = import::review_rows(conn, &sheet)?;
            log_store::record(
                conn,
                &NewLog::new(
                    Some(user_id),
                    actions::IMPORT_SUBMITTED,
                    format!("Uploaded '{}' with {} row(s) for review.", file_name, rows.len()),
                ),
            )?;
            Ok(rows)
        })
        .await?;

    let row_count = rows.len();
    state
        .sessions
        .update(auth.session_id, |s| s.import_rows = rows);
    info!(row_count, "Import submitted for review");
    Ok(Json(ImportSubmitted {
        message: format!("{} row(s) ready for review.", row_count),
        row_count,
        redirect_url: "/import/review",
    }))
}

#[derive(Serialize)]
pub struct ImportReview {
    rows: Vec<ReviewRow>,
    catalogs: Catalogs,
}

pub async fn import_review(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<ImportReview>, AppError> {
    let rows = state
        .sessions
        .update(auth.session_id, |s| s.import_rows.clone())
        .unwrap_or_default();
    if rows.is_empty() {
        return Err(AppError::BadRequest(
            "No import data found. Please upload a file first.".to_string(),
        ));
    }
    let catalogs = state.db.call(load_catalogs).await?;
    Ok(Json(ImportReview { rows, catalogs }))
}

#[derive(Deserialize)]
pub struct ImportSaveRequest {
    #[serde(default)]
    rows: Vec<SaveRow>,
}

#[derive(Serialize)]
pub struct ImportSaved {
    #[serde(flatten)]
    report: ImportReport,
    message: String,
    redirect_url: &'static str,
}

fn report_flash(state: &AppState, auth: &AuthenticatedUser, report: &ImportReport) -> String {
    for skipped in &report.skipped {
        flash(state, auth, FlashLevel::Warning, skipped.clone());
    }
    let message = format!("{} item(s) imported successfully.", report.saved.len());
    flash(state, auth, FlashLevel::Success, message.clone());
    message
}

/// Save the reviewed rows in one transaction and forget the pending import
pub async fn import_save(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ImportSaveRequest>,
) -> Result<Json<ImportSaved>, AppError> {
    if req.rows.is_empty() {
        return Err(AppError::BadRequest("No rows to import.".to_string()));
    }
    let user_id = auth.user_id;
    let report = state
        .db
        .transaction(move |tx| import::save_reviewed(tx, &req.rows, Some(user_id)))
        .await?;

    state
        .sessions
        .update(auth.session_id, |s| s.import_rows.clear());
    let message = report_flash(&state, &auth, &report);
    Ok(Json(ImportSaved {
        report,
        message,
        redirect_url: "/dashboard",
    }))
}

// ============================================================================
// Direct import
// ============================================================================

pub async fn import_direct(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    multipart: Multipart,
) -> Result<Json<ImportSaved>, AppError> {
    let (_, sheet) = uploaded_sheet(multipart).await?;
    let user_id = auth.user_id;
    let report = state
        .db
        .transaction(move |tx| import::direct_import(tx, &sheet, Some(user_id)))
        .await?;

    let message = report_flash(&state, &auth, &report);
    Ok(Json(ImportSaved {
        report,
        message,
        redirect_url: "/dashboard",
    }))
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    item_ids: Option<String>,
    ids: Option<String>,
    format: Option<String>,
}

fn record_export(
    conn: &rusqlite::Connection,
    user_id: i64,
    count: usize,
    format: ExportFormat,
) -> Result<(), StoreError> {
    log_store::record(
        conn,
        &NewLog::new(
            Some(user_id),
            actions::INVENTORY_EXPORTED,
            format!("Exported {} item(s) as {}.", count, format.extension()),
        ),
    )
}

/// Full inventory, or the items in `item_ids`
pub async fn export(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let ids = match query.item_ids.as_deref() {
        Some(raw) => Some(parse_id_list(raw)?).filter(|ids| !ids.is_empty()),
        None => None,
    };
    let format = ExportFormat::parse(query.format.as_deref());
    let user_id = auth.user_id;
    let table = state
        .db
        .call(move |conn| {
            let table = export::inventory_table(conn, ids.as_deref())?;
            if !table.rows.is_empty() {
                record_export(conn, user_id, table.rows.len(), format)?;
            }
            Ok(table)
        })
        .await?;
    if table.rows.is_empty() {
        return Err(AppError::NotFound("No items to export.".to_string()));
    }

    let bytes = table.write(format)?;
    info!(rows = table.rows.len(), format = format.extension(), "Inventory exported");
    Ok(attachment(
        bytes,
        format.content_type(),
        &export::file_name("inventory_export", format.extension()),
    ))
}

/// Short export of the items checked on the dashboard
pub async fn export_selected(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let ids = parse_id_list(query.ids.as_deref().unwrap_or_default())?;
    if ids.is_empty() {
        return Err(AppError::BadRequest("No items selected for export.".to_string()));
    }
    let format = ExportFormat::parse(query.format.as_deref());
    let user_id = auth.user_id;
    let selected = state
        .db
        .call(move |conn| {
            let selected = items::list_live(conn, Some(&ids))?;
            if !selected.is_empty() {
                record_export(conn, user_id, selected.len(), format)?;
            }
            Ok(selected)
        })
        .await?;
    if selected.is_empty() {
        return Err(AppError::NotFound("No matching items found.".to_string()));
    }

    let bytes = export::selected_table(selected).write(format)?;
    Ok(attachment(
        bytes,
        format.content_type(),
        &export::file_name("selected_items", format.extension()),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn reviewed_import_flow() {
        let app = TestApp::new(false).await;
        let (_, category) = app
            .json("POST", "/categories", json!({ "name": "Monitor", "prefix": "MON" }))
            .await;
        let (_, location) = app.json("POST", "/locations", json!({ "name": "HQ" })).await;

        let (status, _) = app.get("/import/review").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let csv = b"Item_Name,Description,Quantity\nDell,24 inch monitor,2\nHP,,\n";
        let (status, body) = app.multipart("/import", "file", "stock.csv", csv, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["row_count"], 2);

        let (status, review) = app.get("/import/review").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(review["rows"][0]["category_id"], category["id"]);
        assert_eq!(review["rows"][1]["quantity"], 1);

        let (status, saved) = app
            .json(
                "POST",
                "/import/save",
                json!({ "rows": [
                    { "row_index": 0, "item_name": "Dell", "category_id": category["id"], "location_id": location["id"], "status": "Online", "serial_number": "S1" },
                    { "row_index": 1, "item_name": "HP", "category_id": category["id"], "location_id": location["id"], "status": "Online", "serial_number": "S1" }
                ] }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["saved"].as_array().unwrap().len(), 1);
        assert!(saved["skipped"][0].as_str().unwrap().starts_with("Row 3:"));

        let (status, _) = app.get("/import/review").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_upload_is_rejected() {
        let app = TestApp::new(false).await;
        let (status, _) = app
            .multipart("/import", "file", "notes.txt", b"hello", &[])
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn export_requires_items() {
        let app = TestApp::new(false).await;
        let (status, _) = app.get("/export").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.get("/export/selected?ids=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.get("/export/selected?ids=1,x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.get("/export/selected?ids=42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        app.json("POST", "/items", json!({ "item_name": "Desk" })).await;
        let (status, body) = app.get("/export?format=csv").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::Null);

        let (_, logs) = app.get("/logs?action=inventory_exported").await;
        assert_eq!(logs["total"], 1);
    }
}
