//! Request handlers, grouped by resource

pub mod auth;
pub mod catalog;
pub mod documents;
pub mod exchange;
pub mod items;
pub mod kits;
pub mod logs;
pub mod scan;

use std::collections::HashMap;

use axum::{
    extract::Multipart,
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use rusqlite::Connection;
use serde::Serialize;

use crate::app::AppState;
use crate::http::middleware::AuthenticatedUser;
use crate::http::AppError;
use crate::session::FlashLevel;
use crate::store::catalog::{self as catalog_store, ItemCategory, Location, Project};
use crate::store::items::ItemStatus;
use crate::store::StoreError;

/// Plain acknowledgement with an optional client-side redirect
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            redirect_url: None,
        }
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }
}

/// Choices offered by item forms
#[derive(Debug, Serialize)]
pub struct Catalogs {
    pub categories: Vec<ItemCategory>,
    pub locations: Vec<Location>,
    pub projects: Vec<Project>,
    pub statuses: Vec<&'static str>,
}

pub fn load_catalogs(conn: &Connection) -> Result<Catalogs, StoreError> {
    Ok(Catalogs {
        categories: catalog_store::list_categories(conn)?,
        locations: catalog_store::list_locations(conn)?,
        projects: catalog_store::list_projects(conn)?,
        statuses: ItemStatus::ALL.iter().map(ItemStatus::as_str).collect(),
    })
}

/// Queue a flash message on the caller's session
pub fn flash(state: &AppState, auth: &AuthenticatedUser, level: FlashLevel, text: impl Into<String>) {
    state.sessions.flash(auth.session_id, level, text);
}

/// Comma-separated ids such as `1,2, 3`; blanks are ignored
pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid item id '{}'", s)))
        })
        .collect()
}

/// Uploaded file
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Multipart body split into files and text fields
#[derive(Debug, Default)]
pub struct MultipartForm {
    files: HashMap<String, UploadedFile>,
    fields: HashMap<String, String>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    if !bytes.is_empty() {
                        form.files.insert(
                            name,
                            UploadedFile {
                                file_name,
                                content_type,
                                bytes,
                            },
                        );
                    }
                }
                None => {
                    form.fields.insert(name, field.text().await?);
                }
            }
        }
        Ok(form)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }

    /// Trimmed text field; `None` when blank
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// File download with a content disposition
pub fn attachment(bytes: Vec<u8>, content_type: &'static str, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::app::AppState;
    use crate::config::Config;
    use crate::http::build_router;
    use crate::session::password::hash_password;
    use crate::store::users::{self, NewUser};
    use crate::store::Database;

    /// Router over an in-memory database with one logged-in user
    pub struct TestApp {
        pub router: Router,
        pub state: AppState,
        pub token: String,
        _media: tempfile::TempDir,
    }

    impl TestApp {
        pub async fn new(superuser: bool) -> Self {
            Self::with_config(superuser, |_| {}).await
        }

        /// As `new`, with test config adjusted by `configure`
        pub async fn with_config(superuser: bool, configure: impl FnOnce(&mut Config)) -> Self {
            let media = tempfile::tempdir().unwrap();
            let mut config = Config::for_tests(media.path());
            configure(&mut config);
            let state = AppState::new(config, Database::in_memory().unwrap()).unwrap();
            let hash = hash_password("password123").unwrap();
            let user = state
                .db
                .call(move |conn| {
                    users::create(
                        conn,
                        &NewUser {
                            username: "tester".into(),
                            email: None,
                            password_hash: hash,
                            is_superuser: superuser,
                        },
                    )
                })
                .await
                .unwrap();
            let token = state.sessions.create(&user);
            Self {
                router: build_router(state.clone()),
                state,
                token,
                _media: media,
            }
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        fn authed(&self, method: &str, uri: &str) -> axum::http::request::Builder {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(self.authed("GET", uri).body(Body::empty()).unwrap()).await
        }

        pub async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
            self.send(
                self.authed(method, uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        /// Multipart request with one file field plus text fields
        pub async fn multipart(
            &self,
            uri: &str,
            file_field: &str,
            file_name: &str,
            content: &[u8],
            fields: &[(&str, &str)],
        ) -> (StatusCode, Value) {
            let boundary = "XBOUNDARYX";
            let mut body = Vec::new();
            for (name, value) in fields {
                body.extend_from_slice(
                    format!(
                        "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                        boundary, name, value
                    )
                    .as_bytes(),
                );
            }
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    boundary, file_field, file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

            self.send(
                self.authed("POST", uri)
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", boundary),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_lists_parse_or_reject() {
        assert_eq!(parse_id_list("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(matches!(parse_id_list("1,x"), Err(AppError::BadRequest(_))));
    }
}
