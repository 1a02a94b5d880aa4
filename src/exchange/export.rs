//! Export tables for inventory and audit logs

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{Cell, Table};
use crate::store::db::StoreError;
use crate::store::items::{self, InventoryItem};
use crate::store::kits;
use crate::store::logs::LogEntry;

const INVENTORY_HEADERS: &[&str] = &[
    "UID No",
    "Item Name",
    "Description",
    "Serial Number",
    "Quantity",
    "Price",
    "Category",
    "Status",
    "Location",
    "Project",
    "Kit",
    "Created By",
    "Created At",
];

const SELECTED_HEADERS: &[&str] = &[
    "Item Name",
    "UID No",
    "Serial Number",
    "Quantity",
    "Location",
    "Project",
    "Status",
    "Description",
    "Created At",
    "Updated At",
];

const LOG_HEADERS: &[&str] = &["Timestamp", "User", "Action", "Item", "UID", "Details"];

fn timestamp(at: DateTime<Utc>) -> Cell {
    Cell::Text(at.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Full inventory export of `ids` (or every live item), ordered by name
pub fn inventory_table(conn: &Connection, ids: Option<&[i64]>) -> Result<Table, StoreError> {
    let items = items::list_live(conn, ids)?;
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let kits = kits::kit_names_for_item(conn, item.id)?;
        let kit = (!kits.is_empty()).then(|| kits.join(", "));
        rows.push(vec![
            Cell::text(item.uid_no),
            Cell::text(item.item_name),
            Cell::text(item.description.unwrap_or_default()),
            Cell::or_na(item.serial_number),
            Cell::Integer(item.quantity),
            Cell::Money(item.price),
            Cell::or_na(item.category_name),
            Cell::text(item.status.as_str()),
            Cell::or_na(item.location_name),
            Cell::or_na(item.project_name),
            Cell::or_na(kit),
            Cell::or_na(item.created_by_name),
            timestamp(item.created_at),
        ]);
    }
    Ok(Table {
        sheet_name: "Inventory",
        headers: INVENTORY_HEADERS,
        rows,
    })
}

/// Short export of explicitly selected items
pub fn selected_table(items: Vec<InventoryItem>) -> Table {
    let rows = items
        .into_iter()
        .map(|item| {
            vec![
                Cell::text(item.item_name),
                Cell::text(item.uid_no),
                Cell::or_na(item.serial_number),
                Cell::Integer(item.quantity),
                Cell::or_na(item.location_name),
                Cell::or_na(item.project_name),
                Cell::text(item.status.as_str()),
                Cell::text(item.description.unwrap_or_default()),
                timestamp(item.created_at),
                timestamp(item.updated_at),
            ]
        })
        .collect();
    Table {
        sheet_name: "Selected Items",
        headers: SELECTED_HEADERS,
        rows,
    }
}

pub fn logs_table(entries: Vec<LogEntry>) -> Table {
    let rows = entries
        .into_iter()
        .map(|entry| {
            vec![
                timestamp(entry.timestamp),
                Cell::text(entry.username.unwrap_or_else(|| "System".to_string())),
                Cell::text(entry.action),
                Cell::or_na(entry.item_name),
                Cell::or_na(entry.uid_number),
                Cell::text(entry.details),
            ]
        })
        .collect();
    Table {
        sheet_name: "Logs",
        headers: LOG_HEADERS,
        rows,
    }
}

/// `{stem}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn file_name(stem: &str, extension: &str) -> String {
    format!("{}_{}.{}", stem, Utc::now().format("%Y%m%d_%H%M%S"), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{ExportFormat, Sheet, SheetFormat};
    use crate::store::items::tests::{form, seed};
    use crate::store::Database;

    #[tokio::test]
    async fn inventory_export_lists_live_items_with_kits() {
        let db = Database::in_memory().unwrap();
        let table = db
            .transaction(|tx| {
                let (category, _) = seed(tx);
                let b = items::insert(tx, &form("Beta laptop", Some(category), Some("SN-B")), None)?;
                items::insert(tx, &form("Alpha laptop", Some(category), None), None)?;
                let gone = items::insert(tx, &form("Gone", None, None), None)?;
                kits::create(tx, "Field kit", &[b.id], None)?;
                crate::store::lifecycle::soft_delete(tx, &[gone.id], None, None)?;
                inventory_table(tx, None)
            })
            .await
            .unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], Cell::text("Alpha laptop"));
        assert_eq!(table.rows[0][3], Cell::text("N/A"));
        assert_eq!(table.rows[1][10], Cell::text("Field kit"));
        assert_eq!(table.rows[1][6], Cell::text("Laptop"));
    }

    #[tokio::test]
    async fn csv_export_has_header_row() {
        let db = Database::in_memory().unwrap();
        let items = db
            .transaction(|tx| {
                items::insert(tx, &form("Monitor", None, None), None)?;
                items::list_live(tx, None)
            })
            .await
            .unwrap();
        let bytes = selected_table(items).write(ExportFormat::Csv).unwrap();
        let sheet = Sheet::read(&bytes, SheetFormat::Csv).unwrap();
        assert_eq!(sheet.headers[0], "item name");
        assert_eq!(sheet.rows[0][0], "Monitor");
        assert!(sheet.rows[0][1].starts_with("OTH"));
    }
}
