//! Files attached to items

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::catalog;
use super::db::{clean, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct InventoryDocument {
    pub id: i64,
    pub item_id: i64,
    pub tag_id: Option<i64>,
    pub tag_name: Option<String>,
    /// Relative to the media root
    pub file_path: String,
    pub file_url: String,
    pub description: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: Option<i64>,
    pub uploaded_by_name: Option<String>,
}

const DOCUMENT_SELECT: &str = "
SELECT d.id, d.item_id, d.tag_id, t.name, d.file_path, d.description, d.uploaded_at,
       d.uploaded_by, u.username
FROM inventory_documents d
LEFT JOIN document_tags t ON t.id = d.tag_id
LEFT JOIN users u ON u.id = d.uploaded_by";

fn map_document(row: &Row<'_>) -> rusqlite::Result<InventoryDocument> {
    let file_path: String = row.get(4)?;
    Ok(InventoryDocument {
        id: row.get(0)?,
        item_id: row.get(1)?,
        tag_id: row.get(2)?,
        tag_name: row.get(3)?,
        file_url: format!("/media/{}", file_path),
        file_path,
        description: row.get(5)?,
        uploaded_at: row.get(6)?,
        uploaded_by: row.get(7)?,
        uploaded_by_name: row.get(8)?,
    })
}

pub fn insert(
    conn: &Connection,
    item_id: i64,
    tag_id: Option<i64>,
    file_path: &str,
    description: Option<String>,
    uploaded_by: Option<i64>,
) -> Result<InventoryDocument, StoreError> {
    if let Some(tag_id) = tag_id {
        if catalog::get_tag(conn, tag_id)?.is_none() {
            return Err(StoreError::invalid(format!("Tag {} does not exist", tag_id)));
        }
    }
    conn.execute(
        "INSERT INTO inventory_documents (item_id, tag_id, file_path, description, uploaded_at, uploaded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item_id,
            tag_id,
            file_path,
            clean(description),
            Utc::now(),
            uploaded_by
        ],
    )?;
    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| StoreError::not_found(format!("Document {}", id)))
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<InventoryDocument>, StoreError> {
    Ok(conn
        .query_row(
            &format!("{} WHERE d.id = ?1", DOCUMENT_SELECT),
            [id],
            map_document,
        )
        .optional()?)
}

/// Document `doc_id` if it belongs to `item_id`
pub fn get_for_item(
    conn: &Connection,
    item_id: i64,
    doc_id: i64,
) -> Result<Option<InventoryDocument>, StoreError> {
    Ok(get(conn, doc_id)?.filter(|d| d.item_id == item_id))
}

pub fn list_for_item(conn: &Connection, item_id: i64) -> Result<Vec<InventoryDocument>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE d.item_id = ?1 ORDER BY d.uploaded_at DESC, d.id DESC",
        DOCUMENT_SELECT
    ))?;
    let docs = stmt
        .query_map([item_id], map_document)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs)
}

/// Remove the row; returns true when no other document shares the file
pub fn delete(conn: &Connection, doc: &InventoryDocument) -> Result<bool, StoreError> {
    conn.execute("DELETE FROM inventory_documents WHERE id = ?1", [doc.id])?;
    Ok(!file_in_use(conn, &doc.file_path)?)
}

pub fn file_paths_for_item(conn: &Connection, item_id: i64) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT file_path FROM inventory_documents WHERE item_id = ?1")?;
    let paths = stmt
        .query_map([item_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(paths)
}

pub fn file_in_use(conn: &Connection, file_path: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM inventory_documents WHERE file_path = ?1",
        [file_path],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::items::{self, tests::form};
    use crate::store::Database;

    #[tokio::test]
    async fn shared_files_are_not_orphaned_until_last_reference() {
        let db = Database::in_memory().unwrap();
        let (first, second) = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("A", None, None), None)?;
                let b = items::insert(tx, &form("B", None, None), None)?;
                let tag = catalog::get_or_create_tag(tx, "Invoice")?;
                let da = insert(tx, a.id, Some(tag.id), "documents/invoices/invoice-1.pdf", None, None)?;
                let db_ = insert(tx, b.id, Some(tag.id), "documents/invoices/invoice-1.pdf", None, None)?;
                Ok((delete(tx, &da)?, delete(tx, &db_)?))
            })
            .await
            .unwrap();
        assert!(!first);
        assert!(second);
    }

    #[tokio::test]
    async fn documents_are_scoped_to_their_item() {
        let db = Database::in_memory().unwrap();
        let (own, other, listed) = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("A", None, None), None)?;
                let b = items::insert(tx, &form("B", None, None), None)?;
                let doc = insert(tx, a.id, None, "item_document/x.pdf", Some(" manual ".into()), None)?;
                Ok((
                    get_for_item(tx, a.id, doc.id)?.map(|d| d.description),
                    get_for_item(tx, b.id, doc.id)?.is_some(),
                    list_for_item(tx, a.id)?.len(),
                ))
            })
            .await
            .unwrap();
        assert_eq!(own, Some(Some("manual".to_string())));
        assert!(!other);
        assert_eq!(listed, 1);
    }

    #[tokio::test]
    async fn unknown_tag_is_rejected() {
        let db = Database::in_memory().unwrap();
        let result = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("A", None, None), None)?;
                insert(tx, a.id, Some(77), "item_document/x.pdf", None, None)
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }
}
