//! Human-readable asset identifiers.
//!
//! A UID is `{PREFIX}{YYMMDD}{SEQ}` where the sequence is zero-padded to four
//! digits and restarts every day for every category prefix. The next sequence
//! is the larger of the highest UID still present and the stored high-water
//! mark, so identifiers of purged items are never handed out again.
//!
//! Callers must run [`next_uid`] inside a write transaction
//! ([`Database::transaction`](super::Database::transaction)); the write lock
//! serializes concurrent allocations.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::db::StoreError;

/// Prefix for items without a category
pub const FALLBACK_PREFIX: &str = "OTH";

/// Today's date on the server clock
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// `PREFIX` + `YYMMDD`
pub fn uid_stem(prefix: &str, day: NaiveDate) -> String {
    format!("{}{}", prefix, day.format("%y%m%d"))
}

pub fn format_uid(prefix: &str, day: NaiveDate, sequence: i64) -> String {
    format!("{}{:04}", uid_stem(prefix, day), sequence)
}

/// Category prefixes are short upper-case alphanumerics
pub fn normalize_prefix(prefix: &str) -> Result<String, StoreError> {
    let prefix = prefix.trim().to_uppercase();
    if prefix.is_empty() || prefix.len() > 10 {
        return Err(StoreError::invalid("Prefix must be 1 to 10 characters"));
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StoreError::invalid("Prefix may only contain letters and digits"));
    }
    Ok(prefix)
}

/// Allocate the next UID for `prefix` (or [`FALLBACK_PREFIX`]) on `day`
pub fn next_uid(
    conn: &Connection,
    prefix: Option<&str>,
    day: NaiveDate,
) -> Result<String, StoreError> {
    let prefix = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => normalize_prefix(p)?,
        None => FALLBACK_PREFIX.to_string(),
    };
    let stem = uid_stem(&prefix, day);

    // Only `stem` followed by nothing but digits counts.
    let highest_present: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(substr(uid_no, ?2) AS INTEGER))
         FROM inventory_items
         WHERE uid_no GLOB ?1 AND substr(uid_no, ?2) NOT GLOB '*[^0-9]*'",
        params![format!("{}[0-9][0-9][0-9][0-9]*", stem), stem.len() as i64 + 1],
        |r| r.get(0),
    )?;

    let high_water: Option<i64> = conn
        .query_row(
            "SELECT last_sequence FROM uid_sequences WHERE category_prefix = ?1 AND day = ?2",
            params![prefix, day],
            |r| r.get(0),
        )
        .optional()?;

    let next = highest_present.unwrap_or(0).max(high_water.unwrap_or(0)) + 1;

    conn.execute(
        "INSERT INTO uid_sequences (category_prefix, day, last_sequence) VALUES (?1, ?2, ?3)
         ON CONFLICT(category_prefix, day) DO UPDATE SET last_sequence = excluded.last_sequence",
        params![prefix, day, next],
    )?;

    Ok(format_uid(&prefix, day, next))
}

/// Whether `uid` is already assigned to any item (deleted ones included)
pub fn uid_taken(conn: &Connection, uid: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM inventory_items WHERE uid_no = ?1",
            [uid],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 18).unwrap()
    }

    fn insert_uid(conn: &Connection, uid: &str) {
        conn.execute(
            "INSERT INTO inventory_items (item_name, uid_no, created_at, updated_at)
             VALUES ('x', ?1, '2025-10-18 00:00:00+00:00', '2025-10-18 00:00:00+00:00')",
            [uid],
        )
        .unwrap();
    }

    #[test]
    fn formats_prefix_date_and_padded_sequence() {
        assert_eq!(format_uid("LAP", day(), 7), "LAP2510180007");
        assert_eq!(format_uid("LAP", day(), 12345), "LAP25101812345");
    }

    #[tokio::test]
    async fn sequences_increase_per_prefix_and_day() {
        let db = Database::in_memory().unwrap();
        let uids = db
            .transaction(|tx| {
                let a = next_uid(tx, Some("lap"), day())?;
                insert_uid(tx, &a);
                let b = next_uid(tx, Some("LAP"), day())?;
                insert_uid(tx, &b);
                let other = next_uid(tx, None, day())?;
                let next_day = next_uid(tx, Some("LAP"), day().succ_opt().unwrap())?;
                Ok(vec![a, b, other, next_day])
            })
            .await
            .unwrap();

        assert_eq!(
            uids,
            vec!["LAP2510180001", "LAP2510180002", "OTH2510180001", "LAP2510190001"]
        );
    }

    #[tokio::test]
    async fn purged_uids_are_not_reissued() {
        let db = Database::in_memory().unwrap();
        let uid = db
            .transaction(|tx| {
                let first = next_uid(tx, Some("MON"), day())?;
                insert_uid(tx, &first);
                tx.execute("DELETE FROM inventory_items", [])?;
                next_uid(tx, Some("MON"), day())
            })
            .await
            .unwrap();
        assert_eq!(uid, "MON2510180002");
    }

    #[tokio::test]
    async fn imported_uids_raise_the_sequence() {
        let db = Database::in_memory().unwrap();
        let uid = db
            .transaction(|tx| {
                insert_uid(tx, "SRV2510180041");
                // Non-digit suffixes do not count towards the sequence.
                insert_uid(tx, "SRV2510189999A");
                next_uid(tx, Some("SRV"), day())
            })
            .await
            .unwrap();
        assert_eq!(uid, "SRV2510180042");
    }

    #[tokio::test]
    async fn concurrent_allocations_are_unique() {
        let db = Database::in_memory().unwrap();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.transaction(|tx| {
                    let uid = next_uid(tx, Some("CAB"), day())?;
                    insert_uid(tx, &uid);
                    Ok(uid)
                })
                .await
                .unwrap()
            }));
        }
        let mut uids = Vec::new();
        for h in handles {
            uids.push(h.await.unwrap());
        }
        uids.sort();
        uids.dedup();
        assert_eq!(uids.len(), 16);
        assert_eq!(uids.last().map(String::as_str), Some("CAB2510180016"));
    }

    #[test]
    fn rejects_bad_prefixes() {
        assert!(normalize_prefix("").is_err());
        assert!(normalize_prefix("LA-P").is_err());
        assert_eq!(normalize_prefix(" srv ").unwrap(), "SRV");
    }
}
