//! Uploaded files under the media root

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// Subdirectory of item documents
pub const DOCUMENT_DIR: &str = "item_document";
/// Subdirectory of scanned invoices
pub const INVOICE_DIR: &str = "documents/invoices";

/// File store rooted at the media directory; paths handed out are relative
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a relative media path; `None` if it escapes the root
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| self.root.join(relative))
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Write `bytes` to `{dir}/{file_name}`; returns the relative path
    pub async fn save(&self, dir: &str, file_name: &str, bytes: &[u8]) -> io::Result<String> {
        let relative = format!("{}/{}", dir.trim_matches('/'), file_name);
        let path = self
            .resolve(&relative)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid media path"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %relative, size = bytes.len(), "Media file saved");
        Ok(relative)
    }

    /// Store an item document as `item_document/{uuid}_{sanitized name}`
    pub async fn save_document(&self, original_name: &str, bytes: &[u8]) -> io::Result<String> {
        let name = format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(original_name));
        self.save(DOCUMENT_DIR, &name, bytes).await
    }

    /// Best-effort removal; a missing file is not an error
    pub async fn remove(&self, relative: &str) {
        let Some(path) = self.resolve(relative) else {
            return;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %relative, "Media file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %relative, "Failed to remove media file: {}", e),
        }
    }
}

/// Keep letters, digits, dot, dash and underscore; everything else becomes `_`
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Lower-case extension including the dot, or empty
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my invoice (1).pdf"), "my_invoice__1_.pdf");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(extension_of("Scan.PDF"), ".pdf");
        assert_eq!(extension_of("noext"), "");
    }

    #[tokio::test]
    async fn saves_and_removes_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::new(dir.path());
        let path = media.save_document("report.pdf", b"%PDF").await.unwrap();
        assert!(path.starts_with("item_document/"));
        assert!(path.ends_with("_report.pdf"));
        assert!(media.exists(&path).await);

        media.remove(&path).await;
        assert!(!media.exists(&path).await);
        assert!(media.save("../outside", "x.txt", b"x").await.is_err());
    }

    #[test]
    fn paths_outside_the_root_never_resolve() {
        let media = MediaStore::new("/srv/media");
        assert!(media.resolve("/etc/passwd").is_none());
        assert!(media.resolve("item_document/../../secret").is_none());
        assert!(!tokio_test::block_on(media.exists("../media/x")));
    }
}
