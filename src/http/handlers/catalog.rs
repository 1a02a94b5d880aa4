//! Categories, locations, projects and document tags

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use tracing::info;

use super::{flash, MessageResponse};
use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::catalog::{
    self as store, CategoryForm, DocumentTag, ItemCategory, Location, LocationForm, Project,
    ProjectForm, TagForm,
};

type Created<T> = Result<(StatusCode, Json<T>), AppError>;

// ============================================================================
// Categories
// ============================================================================

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<ItemCategory>>, AppError> {
    Ok(Json(state.db.call(store::list_categories).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(form): Json<CategoryForm>,
) -> Created<ItemCategory> {
    let category = state
        .db
        .call(move |conn| store::create_category(conn, &form))
        .await?;
    info!(category_id = category.id, prefix = %category.prefix, "Category created");
    flash(
        &state,
        &auth,
        FlashLevel::Success,
        format!("Category '{}' added.", category.name),
    );
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<CategoryForm>,
) -> Result<Json<ItemCategory>, AppError> {
    let category = state
        .db
        .call(move |conn| store::update_category(conn, id, &form))
        .await?;
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .db
        .call(move |conn| store::delete_category(conn, id))
        .await?;
    Ok(Json(MessageResponse::new("Category deleted.")))
}

#[derive(Serialize)]
pub struct PrefixResponse {
    prefix: String,
}

/// Prefix lookup used by the add form to preview UIDs
pub async fn category_prefix(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PrefixResponse>, AppError> {
    let category = state
        .db
        .call(move |conn| store::get_category(conn, id))
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found".to_string()))?;
    Ok(Json(PrefixResponse {
        prefix: category.prefix,
    }))
}

// ============================================================================
// Locations
// ============================================================================

pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>, AppError> {
    Ok(Json(state.db.call(store::list_locations).await?))
}

pub async fn create_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(form): Json<LocationForm>,
) -> Created<Location> {
    let location = state
        .db
        .call(move |conn| store::create_location(conn, &form))
        .await?;
    flash(
        &state,
        &auth,
        FlashLevel::Success,
        format!("Location '{}' added.", location.name),
    );
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<LocationForm>,
) -> Result<Json<Location>, AppError> {
    Ok(Json(
        state
            .db
            .call(move |conn| store::update_location(conn, id, &form))
            .await?,
    ))
}

pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .db
        .call(move |conn| store::delete_location(conn, id))
        .await?;
    Ok(Json(MessageResponse::new("Location deleted.")))
}

// ============================================================================
// Projects
// ============================================================================

pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.db.call(store::list_projects).await?))
}

pub async fn create_project(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(form): Json<ProjectForm>,
) -> Created<Project> {
    let project = state
        .db
        .call(move |conn| store::create_project(conn, &form))
        .await?;
    flash(
        &state,
        &auth,
        FlashLevel::Success,
        format!("Project '{}' added.", project.name),
    );
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<ProjectForm>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(
        state
            .db
            .call(move |conn| store::update_project(conn, id, &form))
            .await?,
    ))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .db
        .call(move |conn| store::delete_project(conn, id))
        .await?;
    Ok(Json(MessageResponse::new("Project deleted.")))
}

// ============================================================================
// Document tags
// ============================================================================

pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<DocumentTag>>, AppError> {
    Ok(Json(state.db.call(store::list_tags).await?))
}

pub async fn create_tag(
    State(state): State<AppState>,
    Json(form): Json<TagForm>,
) -> Created<DocumentTag> {
    let tag = state
        .db
        .call(move |conn| store::create_tag(conn, &form))
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(form): Json<TagForm>,
) -> Result<Json<DocumentTag>, AppError> {
    Ok(Json(
        state
            .db
            .call(move |conn| store::update_tag(conn, id, &form))
            .await?,
    ))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .db
        .call(move |conn| store::delete_tag(conn, id))
        .await?;
    Ok(Json(MessageResponse::new("Tag deleted.")))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn category_prefix_lookup() {
        let app = TestApp::new(false).await;
        let (status, category) = app
            .json("POST", "/categories", json!({ "name": "Monitor", "prefix": "mon" }))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = app
            .get(&format!("/categories/{}/prefix", category["id"]))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prefix"], "MON");

        let (status, _) = app.get("/categories/999/prefix").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let app = TestApp::new(false).await;
        let (status, _) = app.json("POST", "/locations", json!({ "name": "Lab" })).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app.json("POST", "/locations", json!({ "name": "Lab" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn update_and_delete_tags() {
        let app = TestApp::new(false).await;
        let (_, tag) = app.json("POST", "/tags", json!({ "name": "Warranty" })).await;
        let uri = format!("/tags/{}", tag["id"]);

        let (status, body) = app
            .json("PUT", &uri, json!({ "name": "Warranty card", "description": "scan" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "scan");

        let (status, _) = app.json("DELETE", &uri, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.json("DELETE", &uri, json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
