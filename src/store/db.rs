//! SQLite handle shared by all stores

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT UNIQUE,
    password_hash TEXT NOT NULL,
    is_superuser  INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_categories (
    id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name   TEXT NOT NULL UNIQUE,
    prefix TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS locations (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL UNIQUE,
    address        TEXT,
    contact_person TEXT,
    phone_number   TEXT
);

CREATE TABLE IF NOT EXISTS projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    start_date  TEXT,
    end_date    TEXT
);

CREATE TABLE IF NOT EXISTS document_tags (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS inventory_items (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    item_name          TEXT NOT NULL,
    category_id        INTEGER REFERENCES item_categories(id) ON DELETE SET NULL,
    description        TEXT,
    invoice_number     TEXT,
    is_deleted         INTEGER NOT NULL DEFAULT 0,
    deleted_at         TEXT,
    status             TEXT NOT NULL DEFAULT 'Offline',
    uid_no             TEXT UNIQUE,
    serial_number      TEXT UNIQUE,
    quantity           INTEGER NOT NULL DEFAULT 1,
    price              TEXT NOT NULL DEFAULT '0.00',
    location_id        INTEGER REFERENCES locations(id) ON DELETE SET NULL,
    project_id         INTEGER REFERENCES projects(id) ON DELETE SET NULL,
    cpu                TEXT,
    gpu                TEXT,
    os                 TEXT,
    installed_software TEXT,
    owner_poc          TEXT,
    last_transfer_date TEXT,
    created_by         INTEGER REFERENCES users(id) ON DELETE SET NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_items_deleted ON inventory_items(is_deleted, deleted_at);
CREATE INDEX IF NOT EXISTS idx_items_invoice ON inventory_items(invoice_number);

CREATE TABLE IF NOT EXISTS uid_sequences (
    category_prefix TEXT NOT NULL,
    day             TEXT NOT NULL,
    last_sequence   INTEGER NOT NULL,
    PRIMARY KEY (category_prefix, day)
);

CREATE TABLE IF NOT EXISTS technical_data (
    item_id                  INTEGER PRIMARY KEY REFERENCES inventory_items(id) ON DELETE CASCADE,
    host_name                TEXT,
    wifi_mac                 TEXT,
    mac_address              TEXT,
    internet_source          TEXT,
    network                  TEXT,
    ip_address               TEXT,
    build                    TEXT,
    city                     TEXT,
    price                    TEXT NOT NULL DEFAULT '0.00',
    country                  TEXT,
    os                       TEXT,
    google_rd                TEXT,
    pin                      TEXT,
    anydesk_id               TEXT,
    anydesk_password         TEXT,
    elevated_credential      TEXT,
    edit_agent_date          TEXT,
    last_belarc_update       TEXT,
    last_system_update       TEXT,
    known_issues             TEXT,
    pending_hw_replacements  TEXT,
    previous_hw_replacements TEXT
);

CREATE TABLE IF NOT EXISTS kits (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS kit_items (
    kit_id  INTEGER NOT NULL REFERENCES kits(id) ON DELETE CASCADE,
    item_id INTEGER NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
    PRIMARY KEY (kit_id, item_id)
);

CREATE TABLE IF NOT EXISTS inventory_documents (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id     INTEGER NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
    tag_id      INTEGER REFERENCES document_tags(id) ON DELETE SET NULL,
    file_path   TEXT NOT NULL,
    description TEXT,
    uploaded_at TEXT NOT NULL,
    uploaded_by INTEGER REFERENCES users(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_item ON inventory_documents(item_id);

CREATE TABLE IF NOT EXISTS inventory_logs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER REFERENCES users(id) ON DELETE SET NULL,
    item_id    INTEGER REFERENCES inventory_items(id) ON DELETE SET NULL,
    action     TEXT NOT NULL,
    details    TEXT NOT NULL,
    timestamp  TEXT NOT NULL,
    uid_number TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON inventory_logs(timestamp);
";

/// Shared SQLite connection.
///
/// All access goes through [`Database::call`] / [`Database::transaction`],
/// which run on the blocking pool so handlers never stall the runtime.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::init(conn)?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// In-memory database (tests)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a read (or single statement) against the connection
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front, so readers of sequence state (UID
    /// generation) cannot interleave with another writer.
    pub async fn transaction<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Database task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Turn UNIQUE violations into [`StoreError::Conflict`] with a readable message
pub fn unique_violation(err: rusqlite::Error, message: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(message())
        }
        _ => StoreError::Sqlite(err),
    }
}

/// Conflict only when a UNIQUE index on one of `columns` (`table.column`)
/// rejected the write; other constraint failures are invalid input
pub fn unique_violation_on(
    err: rusqlite::Error,
    columns: &[&str],
    message: impl FnOnce() -> String,
) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, detail) if e.code == ErrorCode::ConstraintViolation => {
            let detail = detail.as_deref().unwrap_or_default();
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && columns.iter().any(|c| detail.contains(c))
            {
                StoreError::Conflict(message())
            } else {
                StoreError::Invalid(format!("Constraint failed: {}", detail))
            }
        }
        _ => StoreError::Sqlite(err),
    }
}

/// Read a TEXT column holding a decimal amount
pub fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decimal amounts are stored as TEXT with two decimal places
pub fn decimal_param(value: Decimal) -> String {
    value.round_dp(2).to_string()
}

/// Trim a free-text input, mapping blanks to `None`
pub fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_and_transactions_commit() {
        let db = Database::in_memory().unwrap();
        db.transaction(|tx| {
            tx.execute(
                "INSERT INTO locations (name) VALUES (?1)",
                ["Warehouse A"],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), StoreError> = db
            .transaction(|tx| {
                tx.execute("INSERT INTO locations (name) VALUES ('Office')", [])?;
                Err(StoreError::invalid("abort"))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unique_violation_maps_to_conflict() {
        let db = Database::in_memory().unwrap();
        let err = db
            .call(|conn| {
                conn.execute("INSERT INTO locations (name) VALUES ('Dup')", [])?;
                conn.execute("INSERT INTO locations (name) VALUES ('Dup')", [])
                    .map_err(|e| unique_violation(e, || "Location 'Dup' already exists".into()))?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg.contains("Dup")));
    }

    #[tokio::test]
    async fn only_the_named_unique_index_conflicts() {
        let db = Database::in_memory().unwrap();
        let (serial, reference) = db
            .call(|conn| {
                let now = chrono::Utc::now();
                conn.execute(
                    "INSERT INTO inventory_items (item_name, serial_number, created_at, updated_at)
                     VALUES ('A', 'SN-1', ?1, ?1), ('B', NULL, ?1, ?1)",
                    [now],
                )?;
                let columns = ["inventory_items.serial_number"];
                let serial = conn
                    .execute("UPDATE inventory_items SET serial_number = 'SN-1' WHERE item_name = 'B'", [])
                    .map_err(|e| unique_violation_on(e, &columns, || "Serial number already exists".into()))
                    .unwrap_err();
                let reference = conn
                    .execute("UPDATE inventory_items SET location_id = 999 WHERE item_name = 'B'", [])
                    .map_err(|e| unique_violation_on(e, &columns, || "Serial number already exists".into()))
                    .unwrap_err();
                Ok((serial, reference))
            })
            .await
            .unwrap();
        assert!(matches!(serial, StoreError::Conflict(msg) if msg.starts_with("Serial")));
        assert!(matches!(reference, StoreError::Invalid(msg) if msg.contains("FOREIGN KEY")));
    }

    #[test]
    fn clean_drops_blank_strings() {
        assert_eq!(clean(Some("  ".into())), None);
        assert_eq!(clean(Some(" SN-1 ".into())), Some("SN-1".to_string()));
        assert_eq!(clean(None), None);
    }
}
