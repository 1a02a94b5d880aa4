//! Item document upload, listing and removal

use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, warn};

use super::{flash, MessageResponse, MultipartForm};
use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::documents::{self as store, InventoryDocument};
use crate::store::items;
use crate::store::logs::{self as log_store, actions, NewLog};
use crate::store::StoreError;

pub async fn list(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<Json<Vec<InventoryDocument>>, AppError> {
    let docs = state
        .db
        .call(move |conn| {
            items::get(conn, item_id)?
                .ok_or_else(|| StoreError::not_found(format!("Item {}", item_id)))?;
            store::list_for_item(conn, item_id)
        })
        .await?;
    Ok(Json(docs))
}

/// Multipart fields: `file`, optional `tag_id` and `description`
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(item_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<InventoryDocument>), AppError> {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form
        .take_file("file")
        .ok_or_else(|| AppError::BadRequest("Choose a file to upload".to_string()))?;
    let tag_id = form
        .text("tag_id")
        .map(|t| {
            t.parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid tag id '{}'", t)))
        })
        .transpose()?;
    let description = form.text("description").map(str::to_string);

    state
        .db
        .call(move |conn| items::get_live(conn, item_id))
        .await?;

    let file_path = state.media.save_document(&file.file_name, &file.bytes).await?;
    let user_id = auth.user_id;
    let stored_path = file_path.clone();
    let result = state
        .db
        .transaction(move |tx| {
            let item = items::get_live(tx, item_id)?;
            let doc = store::insert(tx, item_id, tag_id, &stored_path, description, Some(user_id))?;
            log_store::record(
                tx,
                &NewLog::new(
                    Some(user_id),
                    actions::DOCUMENT_UPLOADED,
                    format!(
                        "Document '{}' uploaded for item '{}'.",
                        file.file_name, item.item_name
                    ),
                )
                .item(item.id, &item.uid_no),
            )?;
            Ok(doc)
        })
        .await;

    let doc = match result {
        Ok(doc) => doc,
        Err(e) => {
            state.media.remove(&file_path).await;
            return Err(e.into());
        }
    };

    info!(item_id, document_id = doc.id, path = %doc.file_path, "Document uploaded");
    flash(&state, &auth, FlashLevel::Success, "Document uploaded successfully.");
    Ok((StatusCode::CREATED, Json(doc)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((item_id, doc_id)): Path<(i64, i64)>,
) -> Result<Json<MessageResponse>, AppError> {
    let user_id = auth.user_id;
    let (doc, orphaned) = state
        .db
        .transaction(move |tx| {
            let doc = store::get_for_item(tx, item_id, doc_id)?.ok_or_else(|| {
                StoreError::not_found(format!("Document {} for item {}", doc_id, item_id))
            })?;
            let orphaned = store::delete(tx, &doc)?;
            let uid = items::get(tx, item_id)?.map(|i| i.uid_no);
            log_store::record(
                tx,
                &NewLog::new(
                    Some(user_id),
                    actions::DOCUMENT_DELETED,
                    format!("Document '{}' deleted.", doc.file_path),
                )
                .uid(uid.as_deref()),
            )?;
            Ok((doc, orphaned))
        })
        .await?;

    if orphaned {
        state.media.remove(&doc.file_path).await;
    } else {
        warn!(path = %doc.file_path, "Document file still referenced, keeping it");
    }

    flash(&state, &auth, FlashLevel::Success, "Document deleted.");
    Ok(Json(
        MessageResponse::new("Document deleted.").redirect(format!("/items/{}", item_id)),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn upload_list_and_delete() {
        let app = TestApp::new(false).await;
        let (_, item) = app.json("POST", "/items", json!({ "item_name": "Printer" })).await;
        let id = item["item"]["id"].as_i64().unwrap();

        let (status, doc) = app
            .multipart(
                &format!("/items/{}/documents", id),
                "file",
                "manual v2.pdf",
                b"%PDF-1.4",
                &[("description", "User manual")],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let path = doc["file_path"].as_str().unwrap().to_string();
        assert!(path.starts_with("item_document/"));
        assert!(path.ends_with("_manual_v2.pdf"));
        assert!(app.state.media.exists(&path).await);

        let (_, docs) = app.get(&format!("/items/{}/documents", id)).await;
        assert_eq!(docs.as_array().unwrap().len(), 1);

        let (status, _) = app
            .json(
                "DELETE",
                &format!("/items/{}/documents/{}", id, doc["id"]),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!app.state.media.exists(&path).await);
    }

    #[tokio::test]
    async fn document_must_belong_to_item() {
        let app = TestApp::new(false).await;
        let (_, a) = app.json("POST", "/items", json!({ "item_name": "A" })).await;
        let (_, b) = app.json("POST", "/items", json!({ "item_name": "B" })).await;
        let (_, doc) = app
            .multipart(
                &format!("/items/{}/documents", a["item"]["id"]),
                "file",
                "a.txt",
                b"hello",
                &[],
            )
            .await;

        let (status, _) = app
            .json(
                "DELETE",
                &format!("/items/{}/documents/{}", b["item"]["id"], doc["id"]),
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_needs_a_file() {
        let app = TestApp::new(false).await;
        let (_, item) = app.json("POST", "/items", json!({ "item_name": "A" })).await;
        let (status, _) = app
            .multipart(
                &format!("/items/{}/documents", item["item"]["id"]),
                "file",
                "empty.txt",
                b"",
                &[],
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
