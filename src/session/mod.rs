//! Server-side sessions.
//!
//! A session token is `{session_id}.{hex(hmac_sha256(secret, session_id))}`
//! and travels in the `session_id` cookie or an `Authorization: Bearer`
//! header. Everything else (user, flash messages, pending import rows, the
//! last deletion) stays on the server.

pub mod password;

use std::time::{Duration, Instant};

use dashmap::DashMap;
use hmac::{digest::InvalidLength, Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use crate::exchange::import::ReviewRow;
use crate::store::users::User;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Warning,
    Error,
}

/// One-shot message shown on the next page load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashMessage {
    pub level: FlashLevel,
    pub text: String,
}

/// Invoice uploaded by the last scan, waiting for its items to be saved
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    /// Relative to the media root
    pub invoice_path: String,
    pub invoice_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub is_superuser: bool,
    expires_at: Instant,
    flash: Vec<FlashMessage>,
    pub last_deleted_ids: Vec<i64>,
    pub import_rows: Vec<ReviewRow>,
    pub scan: Option<ScanState>,
}

impl Session {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// User attached to a live session
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub session_id: Uuid,
    pub user_id: i64,
    pub username: String,
    pub is_superuser: bool,
}

/// In-memory session table
pub struct SessionStore {
    sessions: DashMap<Uuid, Session>,
    key: HmacSha256,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(secret: &str, ttl: Duration) -> Result<Self, InvalidLength> {
        Ok(Self {
            sessions: DashMap::new(),
            key: HmacSha256::new_from_slice(secret.as_bytes())?,
            ttl,
        })
    }

    /// Open a session for `user`; returns the signed token
    pub fn create(&self, user: &User) -> String {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            Session {
                user_id: user.id,
                username: user.username.clone(),
                is_superuser: user.is_superuser,
                expires_at: Instant::now() + self.ttl,
                flash: Vec::new(),
                last_deleted_ids: Vec::new(),
                import_rows: Vec::new(),
                scan: None,
            },
        );
        debug!(user_id = user.id, "Session created");
        format!("{}.{}", id, self.sign(&id))
    }

    fn sign(&self, id: &Uuid) -> String {
        let mut mac = self.key.clone();
        mac.update(id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check the signature of a token and return its session id
    pub fn verify_token(&self, token: &str) -> Option<Uuid> {
        let (id, signature) = token.trim().split_once('.')?;
        let id = Uuid::parse_str(id).ok()?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.key.clone();
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id)
    }

    /// Live session for `id`; expired sessions are dropped
    pub fn get(&self, id: Uuid) -> Option<SessionUser> {
        let user = {
            let session = self.sessions.get(&id)?;
            (!session.is_expired()).then(|| SessionUser {
                session_id: id,
                user_id: session.user_id,
                username: session.username.clone(),
                is_superuser: session.is_superuser,
            })
        };
        if user.is_none() {
            self.sessions.remove(&id);
        }
        user
    }

    /// Resolve a token straight to its user
    #[cfg(test)]
    pub fn authenticate(&self, token: &str) -> Option<SessionUser> {
        self.get(self.verify_token(token)?)
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Run `f` against the session's mutable state
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(&id).map(|mut session| f(session.value_mut()))
    }

    pub fn flash(&self, id: Uuid, level: FlashLevel, text: impl Into<String>) {
        let text = text.into();
        self.update(id, |s| s.flash.push(FlashMessage { level, text }));
    }

    /// Drain queued flash messages
    pub fn take_flash(&self, id: Uuid) -> Vec<FlashMessage> {
        self.update(id, |s| std::mem::take(&mut s.flash))
            .unwrap_or_default()
    }

    /// Drop every expired session; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired());
        before - self.sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
