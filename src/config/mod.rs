//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
    /// Upper bound on handling one request
    pub request_timeout: Duration,

    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory for uploaded documents and invoices
    pub media_root: PathBuf,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,

    /// Secret used to sign session tokens
    pub session_secret: String,
    /// Session lifetime
    pub session_ttl: Duration,

    /// How long a soft-deleted item can still be restored
    pub undo_window: Duration,
    /// Interval of the background purge sweep
    pub purge_interval: Duration,

    /// Gemini API key; OCR is disabled when absent
    pub gemini_api_key: Option<String>,
    /// Gemini models endpoint
    pub gemini_api_url: String,
    /// Gemini model used for invoice extraction
    pub gemini_model: String,
    /// Attempts per OCR request
    pub ocr_max_retries: u32,
    /// Base of the exponential OCR retry delay
    pub ocr_retry_base: Duration,

    /// Login attempts allowed per second (server wide)
    pub login_rate_limit: u32,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: Option<String>,

    /// Superuser created at startup when both are set
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.trim().eq_ignore_ascii_case("json")),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 120)?),

            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "inventory.db".to_string())
                .into(),
            media_root: env::var("MEDIA_ROOT")
                .unwrap_or_else(|_| "media".to_string())
                .into(),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,

            session_secret: env::var("SESSION_SECRET")
                .map_err(|_| ConfigError::Missing("SESSION_SECRET"))?,
            session_ttl: Duration::from_secs(parse_or("SESSION_TTL_SECS", 1_209_600)?),

            undo_window: Duration::from_secs(parse_or("UNDO_WINDOW_SECS", 30)?),
            purge_interval: Duration::from_secs(parse_or("PURGE_INTERVAL_SECS", 60)?),

            gemini_api_key: optional("GEMINI_API_KEY"),
            gemini_api_url: env::var("GEMINI_API_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/models".to_string()
            }),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-preview-05-20".to_string()),
            ocr_max_retries: parse_or("OCR_MAX_RETRIES", 5)?,
            ocr_retry_base: Duration::from_secs(parse_or("OCR_RETRY_BASE_SECS", 2)?),

            login_rate_limit: parse_or("LOGIN_RATE_LIMIT", 5)?,
            client_origin: optional("CLIENT_ORIGIN"),

            admin_username: optional("ADMIN_USERNAME"),
            admin_password: optional("ADMIN_PASSWORD"),
        })
    }

    /// Configuration for unit tests: in-process defaults rooted at `media_root`
    #[cfg(test)]
    pub fn for_tests(media_root: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: "127.0.0.1:0".parse().expect("static address"),
            log_level: "debug".to_string(),
            log_json: false,
            request_timeout: Duration::from_secs(30),
            database_path: ":memory:".into(),
            media_root: media_root.into(),
            max_upload_bytes: 5 * 1024 * 1024,
            session_secret: "test-secret".to_string(),
            session_ttl: Duration::from_secs(3600),
            undo_window: Duration::from_secs(30),
            purge_interval: Duration::from_secs(60),
            gemini_api_key: None,
            gemini_api_url: "http://127.0.0.1:9/models".to_string(),
            gemini_model: "test-model".to_string(),
            ocr_max_retries: 2,
            ocr_retry_base: Duration::from_millis(1),
            login_rate_limit: 1000,
            client_origin: None,
            admin_username: None,
            admin_password: None,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_and_rejects_garbage() {
        env::remove_var("ASSET_TEST_UNSET");
        assert_eq!(parse_or("ASSET_TEST_UNSET", 7u32).unwrap(), 7);
        env::set_var("ASSET_TEST_BAD", "seven");
        assert!(matches!(
            parse_or::<u32>("ASSET_TEST_BAD", 7),
            Err(ConfigError::Invalid("ASSET_TEST_BAD"))
        ));
        env::set_var("ASSET_TEST_BLANK", "  ");
        assert_eq!(optional("ASSET_TEST_BLANK"), None);
    }
}
