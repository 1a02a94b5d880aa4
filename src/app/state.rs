//! Application state shared across routes

use std::sync::Arc;

use hmac::digest::InvalidLength;
use tracing::{info, warn};

use crate::config::Config;
use crate::ocr::GeminiClient;
use crate::session::SessionStore;
use crate::store::lifecycle::{self, PurgeReport};
use crate::store::{Database, StoreError};
use crate::util::media::MediaStore;
use crate::util::rate_limit::{create_limiter, create_ocr_limiter, Limiter};
use crate::util::time::undo_cutoff;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub sessions: Arc<SessionStore>,
    pub media: MediaStore,
    /// `None` when no Gemini key is configured
    pub ocr: Option<GeminiClient>,
    pub login_limiter: Arc<Limiter>,
    pub ocr_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Result<Self, InvalidLength> {
        let config = Arc::new(config);

        let sessions = Arc::new(SessionStore::new(&config.session_secret, config.session_ttl)?);
        let media = MediaStore::new(config.media_root.clone());

        let ocr = GeminiClient::from_config(&config);
        if ocr.is_none() {
            warn!("GEMINI_API_KEY not set, invoice OCR is disabled");
        }

        Ok(Self {
            login_limiter: create_limiter(config.login_rate_limit),
            ocr_limiter: create_ocr_limiter(),
            config,
            db,
            sessions,
            media,
            ocr,
        })
    }

    /// Hard-delete items whose undo window elapsed and drop their files
    pub async fn purge_expired(&self) -> Result<PurgeReport, StoreError> {
        let cutoff = undo_cutoff(self.config.undo_window);
        let report = self
            .db
            .transaction(move |tx| lifecycle::purge_expired(tx, cutoff))
            .await?;
        for path in &report.orphaned_files {
            self.media.remove(path).await;
        }
        if !report.purged.is_empty() {
            info!(count = report.purged.len(), uids = ?report.purged, "Purged expired items");
        }
        Ok(report)
    }

    /// Periodic sweep: expired items and sessions
    pub async fn run_maintenance(self) {
        let mut interval = tokio::time::interval(self.config.purge_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.purge_expired().await {
                warn!("Purge sweep failed: {}", e);
            }
            let pruned = self.sessions.prune_expired();
            if pruned > 0 {
                info!(pruned, "Expired sessions removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::documents;
    use crate::store::items::{self, tests::form};
    use std::time::Duration;

    #[tokio::test]
    async fn purge_removes_expired_items_and_orphaned_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_tests(dir.path());
        config.undo_window = Duration::ZERO;
        let state = AppState::new(config, Database::in_memory().unwrap()).unwrap();

        let path = state.media.save_document("manual.pdf", b"%PDF").await.unwrap();
        let stored = path.clone();
        state
            .db
            .transaction(move |tx| {
                let item = items::insert(tx, &form("Old laptop", None, None), None)?;
                documents::insert(tx, item.id, None, &stored, None, None)?;
                lifecycle::soft_delete(tx, &[item.id], None, None)?;
                Ok(())
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = state.purge_expired().await.unwrap();
        assert_eq!(report.purged.len(), 1);
        assert!(!state.media.exists(&path).await);
    }
}
