//! Soft delete, undo and the purge sweep.
//!
//! Deleting only flags an item. It stays restorable until the undo window
//! elapses; the next sweep then removes the row together with its
//! documents, technical data and kit memberships.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::db::StoreError;
use super::documents;
use super::items::{self, InventoryItem};
use super::logs::{self, actions, NewLog};

/// Flag the given live items as deleted; returns the items that were deleted.
///
/// Ids that are missing or already deleted are skipped.
pub fn soft_delete(
    conn: &Connection,
    ids: &[i64],
    user_id: Option<i64>,
    reason: Option<&str>,
) -> Result<Vec<InventoryItem>, StoreError> {
    let now = Utc::now();
    let mut deleted = Vec::new();
    for item in items::list_live(conn, Some(ids))? {
        conn.execute(
            "UPDATE inventory_items SET is_deleted = 1, deleted_at = ?1 WHERE id = ?2",
            params![now, item.id],
        )?;

        let mut details = format!(
            "Item \"{}\" (UID {}) was deleted.",
            item.item_name, item.uid_no
        );
        if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
            details.push_str(&format!(" Reason: {}", reason));
        }
        logs::record(
            conn,
            &NewLog::new(user_id, actions::ITEM_DELETED, details).item(item.id, &item.uid_no),
        )?;
        deleted.push(item);
    }
    Ok(deleted)
}

/// How a restore was triggered, for the audit entry
#[derive(Debug, Clone, Copy)]
pub enum RestoreKind {
    Single,
    LastDeletion,
}

/// Clear the deleted flag on those of `ids` still awaiting purge
pub fn restore(
    conn: &Connection,
    ids: &[i64],
    user_id: Option<i64>,
    kind: RestoreKind,
) -> Result<Vec<InventoryItem>, StoreError> {
    let note = match kind {
        RestoreKind::Single => "undo",
        RestoreKind::LastDeletion => "undo last deletion",
    };
    let mut restored = Vec::new();
    for id in ids {
        let item = match items::get(conn, *id)? {
            Some(item) if item.is_deleted => item,
            _ => continue,
        };
        conn.execute(
            "UPDATE inventory_items SET is_deleted = 0, deleted_at = NULL WHERE id = ?1",
            [item.id],
        )?;
        logs::record(
            conn,
            &NewLog::new(
                user_id,
                actions::ITEM_RESTORED,
                format!(
                    "Item \"{}\" (UID {}) was restored ({}).",
                    item.item_name, item.uid_no, note
                ),
            )
            .item(item.id, &item.uid_no),
        )?;
        restored.push(item);
    }
    Ok(restored)
}

/// Outcome of a purge sweep
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// UIDs of the removed items
    pub purged: Vec<String>,
    /// Media-relative paths no document references any more
    pub orphaned_files: Vec<String>,
}

/// Hard-delete items deleted before `cutoff`
pub fn purge_expired(conn: &Connection, cutoff: DateTime<Utc>) -> Result<PurgeReport, StoreError> {
    let expired: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, item_name, uid_no FROM inventory_items
             WHERE is_deleted = 1 AND deleted_at < ?1
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([cutoff], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut report = PurgeReport::default();
    let mut candidate_files = Vec::new();
    for (id, name, uid) in expired {
        candidate_files.extend(documents::file_paths_for_item(conn, id)?);
        logs::record(
            conn,
            &NewLog::new(
                None,
                actions::ITEM_PURGED,
                format!("Item \"{}\" (UID {}) was permanently deleted.", name, uid),
            )
            .uid(Some(uid.as_str())),
        )?;
        conn.execute("DELETE FROM inventory_items WHERE id = ?1", [id])?;
        report.purged.push(uid);
    }

    candidate_files.sort();
    candidate_files.dedup();
    for path in candidate_files {
        if !documents::file_in_use(conn, &path)? {
            report.orphaned_files.push(path);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::items::tests::form;
    use crate::store::Database;
    use chrono::Duration;

    #[tokio::test]
    async fn delete_then_undo_restores() {
        let db = Database::in_memory().unwrap();
        let (deleted, live_after_delete, restored, live_after_undo) = db
            .transaction(|tx| {
                let item = items::insert(tx, &form("Laptop", None, None), None)?;
                let deleted = soft_delete(tx, &[item.id], None, Some("broken"))?;
                let live_after_delete = items::count_live(tx)?;
                let restored = restore(tx, &[item.id], None, RestoreKind::Single)?;
                let live_after_undo = items::count_live(tx)?;
                Ok((deleted.len(), live_after_delete, restored.len(), live_after_undo))
            })
            .await
            .unwrap();
        assert_eq!((deleted, live_after_delete, restored, live_after_undo), (1, 0, 1, 1));
    }

    #[tokio::test]
    async fn restoring_a_live_item_is_a_no_op() {
        let db = Database::in_memory().unwrap();
        let restored = db
            .transaction(|tx| {
                let item = items::insert(tx, &form("Mouse", None, None), None)?;
                restore(tx, &[item.id], None, RestoreKind::Single)
            })
            .await
            .unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn purge_only_removes_expired_items() {
        let db = Database::in_memory().unwrap();
        let (report, remaining, purge_logs) = db
            .transaction(|tx| {
                let old = items::insert(tx, &form("Old", None, None), None)?;
                let recent = items::insert(tx, &form("Recent", None, None), None)?;
                soft_delete(tx, &[old.id, recent.id], None, None)?;
                tx.execute(
                    "UPDATE inventory_items SET deleted_at = ?1 WHERE id = ?2",
                    params![Utc::now() - Duration::seconds(120), old.id],
                )?;

                let report = purge_expired(tx, Utc::now() - Duration::seconds(30))?;
                let remaining: i64 =
                    tx.query_row("SELECT COUNT(*) FROM inventory_items", [], |r| r.get(0))?;
                let purge_logs = logs::all(
                    tx,
                    &logs::LogFilter {
                        action: Some(actions::ITEM_PURGED.into()),
                        ..Default::default()
                    },
                )?;
                Ok((report, remaining, purge_logs))
            })
            .await
            .unwrap();

        assert_eq!(report.purged.len(), 1);
        assert_eq!(remaining, 1);
        assert_eq!(purge_logs.len(), 1);
        assert_eq!(purge_logs[0].user_id, None);
        assert_eq!(purge_logs[0].item_id, None);
        assert_eq!(purge_logs[0].uid_number.as_deref(), Some(report.purged[0].as_str()));
    }

    #[tokio::test]
    async fn purge_reports_unreferenced_files() {
        let db = Database::in_memory().unwrap();
        let report = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("A", None, None), None)?;
                let b = items::insert(tx, &form("B", None, None), None)?;
                documents::insert(tx, a.id, None, "documents/invoices/invoice-7.pdf", None, None)?;
                documents::insert(tx, b.id, None, "documents/invoices/invoice-7.pdf", None, None)?;
                documents::insert(tx, a.id, None, "item_document/manual.pdf", None, None)?;
                soft_delete(tx, &[a.id], None, None)?;
                purge_expired(tx, Utc::now() + Duration::seconds(1))
            })
            .await
            .unwrap();
        assert_eq!(report.orphaned_files, vec!["item_document/manual.pdf".to_string()]);
    }
}
