//! Kit listing, creation and membership

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use tracing::info;

use super::{flash, MessageResponse};
use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::kits::{self as store, Kit, KitDetail};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Kit>>, AppError> {
    Ok(Json(state.db.call(store::list).await?))
}

#[derive(Deserialize)]
pub struct CreateKitRequest {
    #[serde(default)]
    kit_name: String,
    #[serde(default)]
    item_ids: Vec<i64>,
}

/// Create a kit, or replace the membership of the kit with that name
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateKitRequest>,
) -> Result<(StatusCode, Json<Kit>), AppError> {
    let user_id = auth.user_id;
    let kit = state
        .db
        .transaction(move |tx| store::create(tx, &req.kit_name, &req.item_ids, Some(user_id)))
        .await?;

    info!(kit_id = kit.id, items = kit.item_count, "Kit saved");
    flash(
        &state,
        &auth,
        FlashLevel::Success,
        format!("Kit '{}' created with {} items.", kit.name, kit.item_count),
    );
    Ok((StatusCode::CREATED, Json(kit)))
}

pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<KitDetail>, AppError> {
    Ok(Json(state.db.call(move |conn| store::detail(conn, id)).await?))
}

#[derive(Deserialize)]
pub struct AddItemRequest {
    item_id: i64,
}

pub async fn add_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id = auth.user_id;
    let (kit, item) = state
        .db
        .transaction(move |tx| store::add_item(tx, id, req.item_id, Some(user_id)))
        .await?;

    let message = format!("Item '{}' added to kit '{}'.", item.item_name, kit.name);
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(MessageResponse::new(message).redirect(format!("/kits/{}", id))))
}

pub async fn remove_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id = auth.user_id;
    let (kit, item) = state
        .db
        .transaction(move |tx| store::remove_item(tx, id, item_id, Some(user_id)))
        .await?;

    let message = format!("Item '{}' removed from kit '{}'.", item.item_name, kit.name);
    flash(&state, &auth, FlashLevel::Success, message.clone());
    Ok(Json(MessageResponse::new(message).redirect(format!("/kits/{}", id))))
}
