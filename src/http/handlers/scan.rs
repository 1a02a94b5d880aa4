//! Invoice OCR: scan an invoice, review the extracted lines, save them as items

use axum::{
    extract::{Extension, Multipart, State},
    response::Json,
};
use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::{flash, load_catalogs, Catalogs, MessageResponse, MultipartForm, UploadedFile};
use crate::app::AppState;
use crate::exchange::{parse_decimal, parse_int};
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::ocr::normalize::{estimated_total, file_safe_invoice_number};
use crate::ocr::LineItem;
use crate::session::{FlashLevel, ScanState};
use crate::store::catalog::{self, CategoryForm, OTHER_CATEGORY};
use crate::store::documents;
use crate::store::items::{self, ItemForm, ItemStatus};
use crate::store::logs::{self as log_store, actions, NewLog};
use crate::store::StoreError;
use crate::util::media::{extension_of, INVOICE_DIR};

/// Tag attached to documents created from a scanned invoice
const INVOICE_TAG: &str = "Invoice";

/// MIME type sent to the OCR service
fn mime_type(file: &UploadedFile) -> String {
    match file.content_type.as_deref() {
        Some(ct) if ct != "application/octet-stream" => ct.to_string(),
        _ => match extension_of(&file.file_name).as_str() {
            ".pdf" => "application/pdf",
            ".png" => "image/png",
            ".jpg" | ".jpeg" => "image/jpeg",
            ".webp" => "image/webp",
            _ => "application/octet-stream",
        }
        .to_string(),
    }
}

/// `invoice-{number}{ext}`, or a timestamped, uniquely suffixed name when
/// there is no usable number
fn invoice_file_name(invoice_number: Option<&str>, extension: &str) -> String {
    match invoice_number.and_then(file_safe_invoice_number) {
        Some(number) => format!("invoice-{}{}", number, extension),
        None => {
            let suffix = Uuid::new_v4().simple().to_string();
            format!(
                "invoice-{}_{}{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                &suffix[..8],
                extension
            )
        }
    }
}

#[derive(Serialize)]
pub struct ScanResponse {
    invoice_number: Option<String>,
    invoice_url: String,
    items: Vec<LineItem>,
    estimated_total: Decimal,
    catalogs: Catalogs,
}

/// Multipart fields: `invoice_file` and an optional manual `invoice` number
pub async fn scan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    multipart: Multipart,
) -> Result<Json<ScanResponse>, AppError> {
    let ocr = state
        .ocr
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable("OCR is not configured".to_string()))?;
    if state.ocr_limiter.check().is_err() {
        warn!(user_id = auth.user_id, "OCR rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }

    let mut form = MultipartForm::read(multipart).await?;
    let file = form
        .take_file("invoice_file")
        .ok_or_else(|| AppError::BadRequest("Choose an invoice file to scan".to_string()))?;
    let manual_number = form.text("invoice").map(str::to_string);

    let result = ocr.scan(&file.bytes, &mime_type(&file)).await;
    let invoice_number = manual_number.or(result.invoice_number);

    let file_name = invoice_file_name(invoice_number.as_deref(), &extension_of(&file.file_name));
    if state
        .media
        .exists(&format!("{}/{}", INVOICE_DIR, file_name))
        .await
    {
        return Err(AppError::Conflict(format!(
            "Invoice '{}' has already been uploaded.",
            invoice_number.as_deref().unwrap_or(&file_name)
        )));
    }
    let invoice_path = state.media.save(INVOICE_DIR, &file_name, &file.bytes).await?;

    state.sessions.update(auth.session_id, |s| {
        s.scan = Some(ScanState {
            invoice_path: invoice_path.clone(),
            invoice_number: invoice_number.clone(),
        })
    });

    let user_id = auth.user_id;
    let details = format!(
        "Scanned invoice '{}' and found {} item(s).",
        invoice_number.as_deref().unwrap_or("N/A"),
        result.items.len()
    );
    let catalogs = state
        .db
        .call(move |conn| {
            log_store::record(conn, &NewLog::new(Some(user_id), actions::OCR_SCAN, details))?;
            load_catalogs(conn)
        })
        .await?;

    info!(items = result.items.len(), path = %invoice_path, "Invoice stored");
    Ok(Json(ScanResponse {
        estimated_total: estimated_total(&result.items),
        invoice_url: format!("/media/{}", invoice_path),
        invoice_number,
        items: result.items,
        catalogs,
    }))
}

/// Reviewed invoice line
#[derive(Debug, Deserialize)]
pub struct ScanSaveRow {
    #[serde(default)]
    item_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    quantity: Option<Value>,
    #[serde(default)]
    unit_price: Option<Value>,
    #[serde(default)]
    serial_number: Option<String>,
    /// Category id, or `"other"`
    #[serde(default)]
    category_id: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    location_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct ScanSaveRequest {
    #[serde(default)]
    items: Vec<ScanSaveRow>,
}

#[derive(Serialize)]
pub struct ScanSaved {
    saved: Vec<String>,
    errors: Vec<String>,
    message: String,
    redirect_url: &'static str,
}

/// Id of the "Other" category, created on first use
fn other_category(conn: &Connection) -> Result<Option<i64>, StoreError> {
    if let Some(category) = catalog::find_category_by_name(conn, OTHER_CATEGORY)? {
        return Ok(Some(category.id));
    }
    let form = CategoryForm {
        name: OTHER_CATEGORY.to_string(),
        prefix: "OTH".to_string(),
    };
    match catalog::create_category(conn, &form) {
        Ok(category) => Ok(Some(category.id)),
        Err(StoreError::Conflict(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Text form of a JSON scalar, for lenient number parsing
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Quantity of at least 1; anything else becomes 1
fn row_quantity(raw: Option<&Value>) -> i64 {
    scalar_text(raw)
        .and_then(|q| parse_int(&q))
        .filter(|q| *q >= 1)
        .unwrap_or(1)
}

/// Non-negative price; anything else becomes 0
fn row_price(raw: Option<&Value>) -> Decimal {
    scalar_text(raw)
        .and_then(|p| parse_decimal(&p))
        .filter(|p| *p >= Decimal::ZERO)
        .unwrap_or(Decimal::ZERO)
}

/// Category of a row; unknown ids and `"other"` map to the fallback
fn row_category(
    conn: &Connection,
    raw: Option<&Value>,
    fallback: Option<i64>,
) -> Result<Option<i64>, StoreError> {
    let id = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if catalog::get_category(conn, id)?.is_some() => Ok(Some(id)),
        _ => Ok(fallback),
    }
}

/// Save reviewed lines; with a pending scan each item also gets the
/// invoice file as an `Invoice` document
fn save_rows(
    conn: &Connection,
    scan: Option<&ScanState>,
    rows: &[ScanSaveRow],
    user_id: i64,
) -> Result<(Vec<String>, Vec<String>), StoreError> {
    let fallback = other_category(conn)?;
    let tag = match scan {
        Some(_) => Some(catalog::get_or_create_tag(conn, INVOICE_TAG)?),
        None => None,
    };
    let invoice_number = scan.and_then(|s| s.invoice_number.clone());
    let doc_description = invoice_number.as_ref().map(|n| format!("Invoice {}", n));

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let line = index + 1;
        let status = match row.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => ItemStatus::default(),
            Some(raw) => match ItemStatus::parse(raw) {
                Some(status) => status,
                None => {
                    errors.push(format!("Row {}: unknown status '{}'.", line, raw));
                    continue;
                }
            },
        };
        let form = ItemForm {
            item_name: row.item_name.clone(),
            category_id: row_category(conn, row.category_id.as_ref(), fallback)?,
            description: row.description.clone(),
            invoice_number: invoice_number.clone(),
            serial_number: row.serial_number.clone(),
            quantity: Some(row_quantity(row.quantity.as_ref())),
            price: Some(row_price(row.unit_price.as_ref())),
            status: Some(status),
            location_id: row.location_id,
            ..Default::default()
        };

        let item = match items::insert(conn, &form, Some(user_id)) {
            Ok(item) => item,
            Err(e @ (StoreError::Sqlite(_) | StoreError::Task(_))) => return Err(e),
            Err(e) => {
                errors.push(format!("Row {}: {}", line, e));
                continue;
            }
        };
        if let (Some(scan), Some(tag)) = (scan, &tag) {
            documents::insert(
                conn,
                item.id,
                Some(tag.id),
                &scan.invoice_path,
                doc_description.clone(),
                Some(user_id),
            )?;
        }
        log_store::record(
            conn,
            &NewLog::new(
                Some(user_id),
                actions::ITEM_ADDED,
                format!(
                    "Asset '{}' was added from invoice {} with UID {}.",
                    item.item_name,
                    invoice_number.as_deref().unwrap_or("N/A"),
                    item.uid_no
                ),
            )
            .item(item.id, &item.uid_no),
        )?;
        saved.push(item.uid_no);
    }
    Ok((saved, errors))
}

/// Save reviewed invoice lines as items
pub async fn save(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ScanSaveRequest>,
) -> Result<Json<ScanSaved>, AppError> {
    if req.items.is_empty() {
        return Err(AppError::BadRequest("No items to save.".to_string()));
    }
    let scan = state
        .sessions
        .update(auth.session_id, |s| s.scan.clone())
        .flatten();

    let user_id = auth.user_id;
    let (saved, errors) = state
        .db
        .transaction(move |tx| save_rows(tx, scan.as_ref(), &req.items, user_id))
        .await?;
    if saved.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No items were saved: {}",
            errors.join(" ")
        )));
    }

    state.sessions.update(auth.session_id, |s| s.scan = None);
    for error in &errors {
        flash(&state, &auth, FlashLevel::Warning, error.clone());
    }
    let message = format!("{} item(s) saved from the invoice.", saved.len());
    flash(&state, &auth, FlashLevel::Success, message.clone());
    info!(saved = saved.len(), failed = errors.len(), "Invoice items saved");
    Ok(Json(ScanSaved {
        saved,
        errors,
        message,
        redirect_url: "/dashboard",
    }))
}

/// Forget the pending scan and drop its file unless items already use it
pub async fn clear(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MessageResponse>, AppError> {
    let scan = state
        .sessions
        .update(auth.session_id, |s| s.scan.take())
        .flatten();
    if let Some(scan) = scan {
        let path = scan.invoice_path.clone();
        let in_use = state
            .db
            .call(move |conn| documents::file_in_use(conn, &path))
            .await?;
        if !in_use {
            state.media.remove(&scan.invoice_path).await;
        }
    }
    Ok(Json(
        MessageResponse::new("Scanned invoice cleared.").redirect("/scan"),
    ))
}
