//! Item dashboard, CRUD, transfers and the delete/undo flow

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{flash, load_catalogs, Catalogs, MessageResponse};
use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::{FlashLevel, FlashMessage};
use crate::store::catalog;
use crate::store::documents::{self, InventoryDocument};
use crate::store::items::{
    self, nullable, InventoryItem, ItemForm, ItemPatch, ItemQuery, ItemType, SortField, Transfer,
};
use crate::store::kits;
use crate::store::lifecycle::{self, RestoreKind};
use crate::store::logs::{self as log_store, actions, NewLog};
use crate::store::technical::{self, TechnicalData};
use crate::store::users::{self, User};
use crate::store::{Page, PageRequest, StoreError, PAGE_SIZES};

// ============================================================================
// Dashboard
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    search: Option<String>,
    sort: Option<String>,
    direction: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    items: Page<InventoryItem>,
    search: Option<String>,
    sort: &'static str,
    direction: &'static str,
    page_sizes: [u32; 5],
    total_items: i64,
    catalogs: Catalogs,
    users: Vec<User>,
    messages: Vec<FlashMessage>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardResponse>, AppError> {
    state.purge_expired().await?;

    let item_query = ItemQuery {
        search: query.search.clone().filter(|s| !s.trim().is_empty()),
        sort: SortField::parse(query.sort.as_deref()),
        descending: query.direction.as_deref() == Some("desc"),
    };
    let page = PageRequest::parse(query.page.as_deref(), query.page_size.as_deref());
    let sort = item_query.sort;
    let descending = item_query.descending;

    let (items, total_items, catalogs, users) = state
        .db
        .call(move |conn| {
            Ok((
                items::list_dashboard(conn, &item_query, page)?,
                items::count_live(conn)?,
                load_catalogs(conn)?,
                users::list(conn)?,
            ))
        })
        .await?;

    Ok(Json(DashboardResponse {
        items,
        search: query.search,
        sort: sort.key(),
        direction: if descending { "desc" } else { "asc" },
        page_sizes: PAGE_SIZES,
        total_items,
        catalogs,
        users,
        messages: state.sessions.take_flash(auth.session_id),
    }))
}

// ============================================================================
// Add / details / edit
// ============================================================================

#[derive(Serialize)]
pub struct ItemResponse {
    item: InventoryItem,
    message: String,
    redirect_url: String,
}

pub async fn add(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(form): Json<ItemForm>,
) -> Result<(StatusCode, Json<ItemResponse>), AppError> {
    let user_id = auth.user_id;
    let item = state
        .db
        .transaction(move |tx| items::add(tx, &form, Some(user_id)))
        .await?;

    info!(item_id = item.id, uid = %item.uid_no, "Item added");
    let message = format!(
        "Asset '{}' was added successfully with UID {}.",
        item.item_name, item.uid_no
    );
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok((
        StatusCode::CREATED,
        Json(ItemResponse {
            redirect_url: format!("/items/{}", item.id),
            item,
            message,
        }),
    ))
}

#[derive(Serialize)]
pub struct DetailsResponse {
    item: InventoryItem,
    documents: Vec<InventoryDocument>,
    kit_names: String,
    technical: Option<TechnicalData>,
    item_type: ItemType,
    /// Present while a deleted item can still be restored
    #[serde(skip_serializing_if = "Option::is_none")]
    undo_url: Option<String>,
}

/// Item by id or UID; deleted items still resolve so the client can offer undo
pub async fn details(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DetailsResponse>, AppError> {
    let response = state
        .db
        .call(move |conn| {
            let item = items::find_by_key(conn, &key)?
                .ok_or_else(|| StoreError::not_found(format!("Item '{}'", key)))?;
            let kit_names = kits::kit_names_for_item(conn, item.id)?;
            Ok(DetailsResponse {
                documents: documents::list_for_item(conn, item.id)?,
                kit_names: if kit_names.is_empty() {
                    "N/A".to_string()
                } else {
                    kit_names.join(", ")
                },
                technical: technical::get(conn, item.id)?,
                item_type: items::item_type(&item.item_name),
                undo_url: item.is_deleted.then(|| format!("/items/{}/undo", item.id)),
                item,
            })
        })
        .await?;
    Ok(Json(response))
}

pub async fn edit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<ItemResponse>, AppError> {
    let user_id = auth.user_id;
    let item = state
        .db
        .transaction(move |tx| items::update(tx, id, &patch, Some(user_id)))
        .await?;

    let message = format!("Item '{}' updated successfully.", item.item_name);
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(ItemResponse {
        redirect_url: format!("/items/{}", item.id),
        item,
        message,
    }))
}

// ============================================================================
// Search
// ============================================================================

#[derive(Deserialize)]
pub struct SearchRequest {
    term: String,
}

/// Exact UID or serial lookup for the modify flow
pub async fn search(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let term = req.term.trim().to_string();
    if term.is_empty() {
        return Err(AppError::BadRequest("Enter a UID or serial number".to_string()));
    }
    let user_id = auth.user_id;
    let item = state
        .db
        .transaction(move |tx| {
            let mut found = items::search_exact(tx, &term)?;
            match found.len() {
                0 => Err(StoreError::not_found(format!(
                    "Item with UID or serial number '{}'",
                    term
                ))),
                1 => {
                    let item = found.remove(0);
                    log_store::record(
                        tx,
                        &NewLog::new(
                            Some(user_id),
                            actions::ITEM_SEARCH,
                            format!("Searched for '{}' and found item '{}'.", term, item.item_name),
                        )
                        .item(item.id, &item.uid_no),
                    )?;
                    Ok(item)
                }
                n => Err(StoreError::Conflict(format!(
                    "{} items match '{}'; refine the search",
                    n, term
                ))),
            }
        })
        .await?;

    Ok(Json(
        MessageResponse::new(format!("Found item '{}'.", item.item_name))
            .redirect(format!("/items/{}", item.id)),
    ))
}

// ============================================================================
// Transfers
// ============================================================================

#[derive(Deserialize)]
pub struct TransferRequest {
    location_id: i64,
    #[serde(default, deserialize_with = "nullable")]
    project_id: Option<Option<i64>>,
    #[serde(default)]
    transfer_date: Option<NaiveDate>,
    #[serde(default)]
    owner_poc: Option<String>,
}

pub async fn transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<ItemResponse>, AppError> {
    let user_id = auth.user_id;
    let item = state
        .db
        .transaction(move |tx| {
            if catalog::location_count(tx)? == 0 {
                return Err(StoreError::invalid(
                    "No locations available. Please add a location first.",
                ));
            }
            let transfer = Transfer {
                location_id: req.location_id,
                project_id: req.project_id,
                transfer_date: req.transfer_date,
                owner_poc: req.owner_poc,
            };
            items::transfer(tx, id, &transfer, Some(user_id))
        })
        .await?;

    let message = format!(
        "Item '{}' transferred to {}.",
        item.item_name,
        item.location_name.as_deref().unwrap_or("N/A")
    );
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(ItemResponse {
        redirect_url: format!("/items/{}", item.id),
        item,
        message,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchTransferRow {
    id: Value,
    #[serde(default)]
    new_location: Option<Value>,
    #[serde(default)]
    project: Option<Value>,
    #[serde(default)]
    transfer_date: Option<String>,
    #[serde(default)]
    poc_name: Option<String>,
}

/// Integer from a JSON number or numeric string
fn value_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn batch_transfer_row(row: &BatchTransferRow) -> Result<(i64, Transfer), String> {
    let id = value_id(&row.id).ok_or_else(|| format!("invalid item id {}", row.id))?;
    let location_id = row
        .new_location
        .as_ref()
        .and_then(value_id)
        .ok_or_else(|| format!("item {}: new location is required", id))?;
    let transfer_date = row
        .transfer_date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| format!("item {}: transfer date is required", id))?;
    let transfer_date = NaiveDate::parse_from_str(transfer_date, "%Y-%m-%d")
        .map_err(|_| format!("item {}: transfer date must be YYYY-MM-DD", id))?;
    let project_id = match &row.project {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(value_id(v).ok_or_else(|| format!("item {}: invalid project", id))?),
    };
    Ok((
        id,
        Transfer {
            location_id,
            project_id: Some(project_id),
            transfer_date: Some(transfer_date),
            owner_poc: row.poc_name.clone(),
        },
    ))
}

/// Each row is applied in its own transaction; failures do not undo the others
pub async fn batch_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(rows): Json<Vec<BatchTransferRow>>,
) -> Result<Json<MessageResponse>, AppError> {
    if rows.is_empty() {
        return Err(AppError::BadRequest("No items selected for transfer".to_string()));
    }

    let mut transferred = 0usize;
    let mut failures = Vec::new();
    for row in &rows {
        let (id, transfer) = match batch_transfer_row(row) {
            Ok(parsed) => parsed,
            Err(msg) => {
                failures.push(msg);
                continue;
            }
        };
        let user_id = auth.user_id;
        match state
            .db
            .transaction(move |tx| items::transfer(tx, id, &transfer, Some(user_id)))
            .await
        {
            Ok(_) => transferred += 1,
            Err(e @ (StoreError::Sqlite(_) | StoreError::Task(_))) => return Err(e.into()),
            Err(e) => failures.push(format!("item {}: {}", id, e)),
        }
    }

    let summary = format!("Successfully transferred {} item(s).", transferred);
    if !failures.is_empty() {
        warn!(transferred, failed = failures.len(), "Batch transfer had failures");
        return Err(AppError::BadRequest(format!(
            "{} {} item(s) failed: {}",
            summary,
            failures.len(),
            failures.join("; ")
        )));
    }
    flash(&state, &auth, FlashLevel::Success, summary.clone());
    Ok(Json(MessageResponse::new(summary).redirect("/dashboard")))
}

// ============================================================================
// Delete / undo
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    message: String,
    deleted: usize,
    undo_url: String,
}

async fn delete_items(
    state: &AppState,
    auth: &AuthenticatedUser,
    ids: Vec<i64>,
    reason: Option<String>,
) -> Result<Vec<InventoryItem>, AppError> {
    let user_id = auth.user_id;
    let deleted = state
        .db
        .transaction(move |tx| lifecycle::soft_delete(tx, &ids, Some(user_id), reason.as_deref()))
        .await?;
    if deleted.is_empty() {
        return Err(AppError::NotFound("No items found to delete.".to_string()));
    }
    let ids: Vec<i64> = deleted.iter().map(|i| i.id).collect();
    state
        .sessions
        .update(auth.session_id, |s| s.last_deleted_ids = ids);
    info!(count = deleted.len(), "Items soft-deleted");
    Ok(deleted)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    body: Option<Json<DeleteRequest>>,
) -> Result<Json<DeleteResponse>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let deleted = delete_items(&state, &auth, vec![id], reason).await?;
    let message = format!("Item '{}' deleted.", deleted[0].item_name);
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(DeleteResponse {
        message,
        deleted: 1,
        undo_url: format!("/items/{}/undo", id),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    #[serde(default)]
    item_ids: Vec<Value>,
    #[serde(default)]
    reason: Option<String>,
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<BatchDeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    if req.item_ids.is_empty() {
        return Err(AppError::BadRequest("No items selected for deletion.".to_string()));
    }
    let ids = req
        .item_ids
        .iter()
        .map(|v| value_id(v).ok_or_else(|| AppError::BadRequest(format!("Invalid item id {}", v))))
        .collect::<Result<Vec<_>, _>>()?;

    let deleted = delete_items(&state, &auth, ids, req.reason).await?;
    let message = format!("{} item(s) deleted.", deleted.len());
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(DeleteResponse {
        message,
        deleted: deleted.len(),
        undo_url: "/items/undo-last".to_string(),
    }))
}

pub async fn undo(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id = auth.user_id;
    let restored = state
        .db
        .transaction(move |tx| {
            items::get(tx, id)?.ok_or_else(|| StoreError::not_found(format!("Item {}", id)))?;
            lifecycle::restore(tx, &[id], Some(user_id), RestoreKind::Single)
        })
        .await?;

    let message = match restored.first() {
        Some(item) => format!("Item '{}' restored.", item.item_name),
        None => "Item is not deleted; nothing to undo.".to_string(),
    };
    if !restored.is_empty() {
        flash(&state, &auth, FlashLevel::Success, message.clone());
    }
    Ok(Json(MessageResponse::new(message).redirect(format!("/items/{}", id))))
}

pub async fn undo_last(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MessageResponse>, AppError> {
    let ids = state
        .sessions
        .update(auth.session_id, |s| std::mem::take(&mut s.last_deleted_ids))
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(AppError::BadRequest("There is no deletion to undo.".to_string()));
    }

    let user_id = auth.user_id;
    let restored = state
        .db
        .transaction(move |tx| {
            lifecycle::restore(tx, &ids, Some(user_id), RestoreKind::LastDeletion)
        })
        .await?;
    if restored.is_empty() {
        return Err(AppError::NotFound(
            "The deleted items were already purged.".to_string(),
        ));
    }

    let message = format!("{} item(s) restored.", restored.len());
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(MessageResponse::new(message).redirect("/dashboard")))
}

// ============================================================================
// Technical data
// ============================================================================

#[derive(Serialize)]
pub struct TechnicalResponse {
    item_id: i64,
    uid_no: String,
    item_name: String,
    technical: Option<TechnicalData>,
}

/// Technical record by item id or UID
pub async fn technical(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<TechnicalResponse>, AppError> {
    let response = state
        .db
        .call(move |conn| {
            let item = items::find_by_key(conn, &key)?
                .ok_or_else(|| StoreError::not_found(format!("Item '{}'", key)))?;
            Ok(TechnicalResponse {
                technical: technical::get(conn, item.id)?,
                item_id: item.id,
                uid_no: item.uid_no,
                item_name: item.item_name,
            })
        })
        .await?;
    Ok(Json(response))
}

pub async fn save_technical(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
    Json(form): Json<TechnicalData>,
) -> Result<Json<TechnicalResponse>, AppError> {
    let user_id = auth.user_id;
    let response = state
        .db
        .transaction(move |tx| {
            let item = items::find_by_key(tx, &key)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| StoreError::not_found(format!("Item '{}'", key)))?;
            let saved = technical::upsert(tx, item.id, &item.uid_no, &form, Some(user_id))?;
            Ok(TechnicalResponse {
                technical: Some(saved),
                item_id: item.id,
                uid_no: item.uid_no,
                item_name: item.item_name,
            })
        })
        .await?;

    flash(
        &state,
        &auth,
        FlashLevel::Success,
        format!("Technical data saved for {}.", response.uid_no),
    );
    Ok(Json(response))
}
