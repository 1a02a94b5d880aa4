//! Audit log of user and system actions

use chrono::{DateTime, Days, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};
use serde::{Deserialize, Serialize};

use super::db::StoreError;
use super::{Page, PageRequest};

/// Action names recorded in the log
pub mod actions {
    pub const LOGIN: &str = "login";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGOUT: &str = "logout";
    pub const REGISTER: &str = "register";
    pub const ITEM_ADDED: &str = "item_added";
    pub const ITEM_UPDATED: &str = "item_updated";
    pub const ITEM_DELETED: &str = "item_deleted";
    pub const ITEM_RESTORED: &str = "item_restored";
    pub const ITEM_PURGED: &str = "item_purged";
    pub const ITEM_SEARCH: &str = "item_search";
    pub const TRANSFERRED: &str = "transferred";
    pub const TECHNICAL_DATA_SAVED: &str = "technical_data_saved";
    pub const KIT_CREATED: &str = "kit_created";
    pub const ADDED_TO_KIT: &str = "added_to_kit";
    pub const REMOVED_FROM_KIT: &str = "removed_from_kit";
    pub const DOCUMENT_UPLOADED: &str = "document_uploaded";
    pub const DOCUMENT_DELETED: &str = "document_deleted";
    pub const IMPORT_SUBMITTED: &str = "import_submitted";
    pub const ITEMS_IMPORTED: &str = "items_imported";
    pub const INVENTORY_EXPORTED: &str = "inventory_exported";
    pub const OCR_SCAN: &str = "ocr_scan";
    pub const LOGS_CLEARED: &str = "logs_cleared";
}

/// Log row as shown to clients
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub item_id: Option<i64>,
    pub item_name: Option<String>,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    pub uid_number: Option<String>,
}

/// Entry to be recorded
#[derive(Debug, Clone)]
pub struct NewLog {
    pub user_id: Option<i64>,
    pub item_id: Option<i64>,
    pub uid_number: Option<String>,
    pub action: &'static str,
    pub details: String,
}

impl NewLog {
    pub fn new(user_id: Option<i64>, action: &'static str, details: impl Into<String>) -> Self {
        Self {
            user_id,
            item_id: None,
            uid_number: None,
            action,
            details: details.into(),
        }
    }

    /// Attach the item and remember its UID at the time of the action
    pub fn item(mut self, item_id: i64, uid: &str) -> Self {
        self.item_id = Some(item_id);
        self.uid_number = Some(uid.to_string());
        self
    }

    /// Record a UID without linking the item row (purged items)
    pub fn uid(mut self, uid: Option<&str>) -> Self {
        self.uid_number = uid.map(str::to_string);
        self
    }
}

/// Filters of the log listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub user: Option<i64>,
    pub action: Option<String>,
    pub item_name: Option<String>,
    pub uid_number: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

pub fn record(conn: &Connection, log: &NewLog) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO inventory_logs (user_id, item_id, action, details, timestamp, uid_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            log.user_id,
            log.item_id,
            log.action,
            log.details,
            Utc::now(),
            log.uid_number,
        ],
    )?;
    Ok(())
}

const LOG_SELECT: &str = "
SELECT g.id, g.user_id, u.username, g.item_id, i.item_name, g.action, g.details, g.timestamp, g.uid_number
FROM inventory_logs g
LEFT JOIN users u ON u.id = g.user_id
LEFT JOIN inventory_items i ON i.id = g.item_id";

fn map_log(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
        item_id: row.get(3)?,
        item_name: row.get(4)?,
        action: row.get(5)?,
        details: row.get(6)?,
        timestamp: row.get(7)?,
        uid_number: row.get(8)?,
    })
}

fn where_clause(filter: &LogFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(user) = filter.user {
        clauses.push("g.user_id = ?");
        args.push(Value::Integer(user));
    }
    if let Some(action) = non_blank(&filter.action) {
        clauses.push("LOWER(g.action) LIKE ? ESCAPE '\\'");
        args.push(Value::Text(contains_pattern(action)));
    }
    if let Some(name) = non_blank(&filter.item_name) {
        clauses.push("(LOWER(i.item_name) LIKE ? ESCAPE '\\' OR LOWER(g.details) LIKE ? ESCAPE '\\')");
        let pattern = contains_pattern(name);
        args.push(Value::Text(pattern.clone()));
        args.push(Value::Text(pattern));
    }
    if let Some(uid) = non_blank(&filter.uid_number) {
        clauses.push("LOWER(g.uid_number) LIKE ? ESCAPE '\\'");
        args.push(Value::Text(contains_pattern(uid)));
    }
    if let Some(start) = filter.start_date {
        clauses.push("g.timestamp >= ?");
        args.push(Value::Text(day_start(start)));
    }
    if let Some(end) = filter.end_date.and_then(|d| d.checked_add_days(Days::new(1))) {
        clauses.push("g.timestamp < ?");
        args.push(Value::Text(day_start(end)));
    }

    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), args)
    }
}

/// Same textual form rusqlite uses for `DateTime<Utc>`, so comparisons are lexical
fn day_start(day: NaiveDate) -> String {
    format!("{} 00:00:00+00:00", day.format("%Y-%m-%d"))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `%term%` pattern for a case-insensitive LIKE
pub fn contains_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub fn list(
    conn: &Connection,
    filter: &LogFilter,
    page: PageRequest,
) -> Result<Page<LogEntry>, StoreError> {
    let (where_sql, args) = where_clause(filter);

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM inventory_logs g LEFT JOIN inventory_items i ON i.id = g.item_id{}",
            where_sql
        ),
        params_from_iter(args.iter()),
        |r| r.get(0),
    )?;
    let (page_no, num_pages, offset) = page.resolve(total as u64);

    let sql = format!(
        "{}{} ORDER BY g.timestamp DESC, g.id DESC LIMIT {} OFFSET {}",
        LOG_SELECT, where_sql, page.page_size, offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), map_log)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page: page_no,
        page_size: page.page_size,
        num_pages,
        total: total as u64,
    })
}

/// Every entry matching `filter`, newest first (exports)
pub fn all(conn: &Connection, filter: &LogFilter) -> Result<Vec<LogEntry>, StoreError> {
    let (where_sql, args) = where_clause(filter);
    let sql = format!(
        "{}{} ORDER BY g.timestamp DESC, g.id DESC",
        LOG_SELECT, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params_from_iter(args.iter()), map_log)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Delete every log row; returns how many were removed
pub fn clear_all(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM inventory_logs", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[tokio::test]
    async fn filters_by_action_and_uid() {
        let db = Database::in_memory().unwrap();
        let page = db
            .call(|conn| {
                record(conn, &NewLog::new(None, actions::LOGIN, "User logged in successfully."))?;
                record(
                    conn,
                    &NewLog::new(None, actions::ITEM_PURGED, "Item \"Dock\" was permanently deleted.")
                        .uid(Some("DOC2510180001")),
                )?;
                record(conn, &NewLog::new(None, actions::LOGOUT, "User logged out."))?;

                let filter = LogFilter {
                    action: Some("PURGE".into()),
                    uid_number: Some("2510".into()),
                    ..Default::default()
                };
                list(conn, &filter, PageRequest::default())
            })
            .await
            .unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].action, actions::ITEM_PURGED);
        assert_eq!(page.items[0].uid_number.as_deref(), Some("DOC2510180001"));
    }

    #[tokio::test]
    async fn newest_first_and_date_bounds() {
        let db = Database::in_memory().unwrap();
        let (all_entries, future_only) = db
            .call(|conn| {
                record(conn, &NewLog::new(None, actions::LOGIN, "first"))?;
                record(conn, &NewLog::new(None, actions::LOGOUT, "second"))?;
                let everything = all(conn, &LogFilter::default())?;
                let tomorrow = Utc::now().date_naive().succ_opt().unwrap();
                let future = all(
                    conn,
                    &LogFilter {
                        start_date: Some(tomorrow),
                        ..Default::default()
                    },
                )?;
                Ok((everything, future))
            })
            .await
            .unwrap();

        assert_eq!(all_entries.len(), 2);
        assert_eq!(all_entries[0].details, "second");
        assert!(future_only.is_empty());
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(contains_pattern("50%_Off"), "%50\\%\\_off%");
    }
}
