//! Spreadsheet import: a reviewed two-step flow and a one-step direct import

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

use super::{parse_decimal, parse_int, Sheet};
use crate::store::catalog::{self, ItemCategory, OTHER_CATEGORY};
use crate::store::db::{clean, StoreError};
use crate::store::items::{self, ItemForm, ItemStatus};
use crate::store::logs::{self, actions, NewLog};
use crate::store::uid;

/// Parsed row awaiting review, kept on the session
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRow {
    /// 0-based data row in the uploaded sheet
    pub row_index: usize,
    pub item_name: String,
    pub description: String,
    pub quantity: i64,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    /// Serials are entered during review
    pub serial_number: String,
}

/// Category whose name appears earliest in `description`, else "Other"
fn match_category<'a>(categories: &'a [ItemCategory], description: &str) -> Option<&'a ItemCategory> {
    let lower = description.to_lowercase();
    categories
        .iter()
        .filter(|c| !c.name.trim().is_empty())
        .filter_map(|c| lower.find(&c.name.to_lowercase()).map(|pos| (pos, c)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, c)| c)
        .or_else(|| categories.iter().find(|c| c.name.eq_ignore_ascii_case(OTHER_CATEGORY)))
}

/// Turn an uploaded sheet into review rows
pub fn review_rows(conn: &Connection, sheet: &Sheet) -> Result<Vec<ReviewRow>, StoreError> {
    let categories = catalog::list_categories(conn)?;
    let rows = sheet
        .records()
        .map(|record| {
            let description = record.get("description").unwrap_or_default().to_string();
            let category = match_category(&categories, &description);
            ReviewRow {
                row_index: record.index,
                item_name: record.get("item_name").unwrap_or_default().to_string(),
                quantity: record
                    .get("quantity")
                    .and_then(parse_int)
                    .filter(|q| *q >= 1)
                    .unwrap_or(1),
                description,
                category_id: category.map(|c| c.id),
                category_name: category.map(|c| c.name.clone()),
                serial_number: String::new(),
            }
        })
        .collect();
    Ok(rows)
}

/// Reviewed row as submitted by the client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveRow {
    #[serde(default)]
    pub row_index: usize,
    pub item_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub quantity: Option<i64>,
}

/// Outcome of an import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// UIDs of the created items
    pub saved: Vec<String>,
    /// One message per skipped row
    pub skipped: Vec<String>,
}

impl ImportReport {
    fn log_summary(&self, conn: &Connection, user_id: Option<i64>, source: &str) -> Result<(), StoreError> {
        logs::record(
            conn,
            &NewLog::new(
                user_id,
                actions::ITEMS_IMPORTED,
                format!(
                    "Imported {} item(s) from {}; {} row(s) skipped.",
                    self.saved.len(),
                    source,
                    self.skipped.len()
                ),
            ),
        )
    }
}

fn record_added(conn: &Connection, item: &items::InventoryItem, user_id: Option<i64>) -> Result<(), StoreError> {
    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::ITEM_ADDED,
            format!("Asset '{}' was imported with UID {}.", item.item_name, item.uid_no),
        )
        .item(item.id, &item.uid_no),
    )
}

/// Save reviewed rows; call inside one transaction so UIDs stay contiguous.
///
/// Rows with a serial already in the database, or repeated earlier in the
/// batch, are skipped with a warning naming the spreadsheet row.
pub fn save_reviewed(
    conn: &Connection,
    rows: &[SaveRow],
    user_id: Option<i64>,
) -> Result<ImportReport, StoreError> {
    let mut report = ImportReport::default();
    let mut batch_serials = HashSet::new();

    for row in rows {
        let sheet_row = row.row_index + 2;
        let (Some(category_id), Some(location_id), Some(status)) =
            (row.category_id, row.location_id, row.status.as_deref())
        else {
            report.skipped.push(format!(
                "Row {}: category, location and status are required.",
                sheet_row
            ));
            continue;
        };
        let Some(status) = ItemStatus::parse(status) else {
            report.skipped.push(format!("Row {}: unknown status '{}'.", sheet_row, status));
            continue;
        };

        let serial = clean(row.serial_number.clone());
        if let Some(serial) = &serial {
            if batch_serials.contains(serial) || items::serial_taken(conn, serial, None)? {
                report.skipped.push(format!(
                    "Row {}: serial number '{}' already exists. Item skipped.",
                    sheet_row, serial
                ));
                continue;
            }
        }

        let form = ItemForm {
            item_name: row.item_name.clone(),
            category_id: Some(category_id),
            description: row.description.clone(),
            serial_number: serial.clone(),
            quantity: Some(row.quantity.unwrap_or(1)),
            price: Some(row.price.unwrap_or(Decimal::ONE)),
            status: Some(status),
            location_id: Some(location_id),
            project_id: row.project_id,
            ..Default::default()
        };
        match items::insert(conn, &form, user_id) {
            Ok(item) => {
                record_added(conn, &item, user_id)?;
                if let Some(serial) = serial {
                    batch_serials.insert(serial);
                }
                report.saved.push(item.uid_no);
            }
            Err(StoreError::Sqlite(e)) => return Err(StoreError::Sqlite(e)),
            Err(e) => report.skipped.push(format!("Row {}: {}", sheet_row, e)),
        }
    }

    report.log_summary(conn, user_id, "reviewed spreadsheet")?;
    info!(saved = report.saved.len(), skipped = report.skipped.len(), "Reviewed import saved");
    Ok(report)
}

/// One-step import of a sheet carrying ids for category and location.
///
/// Columns: `item_name`, `description`, `serial_number`, `quantity`,
/// `unit_price`, `category_id`, `location_id`, `status` and an optional
/// `uid_no`. Rows that cannot be saved are skipped with a message.
pub fn direct_import(
    conn: &Connection,
    sheet: &Sheet,
    user_id: Option<i64>,
) -> Result<ImportReport, StoreError> {
    let mut report = ImportReport::default();

    for record in sheet.records() {
        let sheet_row = record.sheet_row();
        let mut skip = |msg: String| report.skipped.push(format!("Row {}: {}", sheet_row, msg));

        let Some(item_name) = record.get("item_name") else {
            skip("item name is missing.".into());
            continue;
        };
        let category = match record.get("category_id").and_then(parse_int) {
            Some(id) => catalog::get_category(conn, id)?,
            None => None,
        };
        let Some(category) = category else {
            skip("missing or unknown category.".into());
            continue;
        };
        let location = match record.get("location_id").and_then(parse_int) {
            Some(id) => catalog::get_location(conn, id)?,
            None => None,
        };
        let Some(location) = location else {
            skip("missing or unknown location.".into());
            continue;
        };
        let status = match record.get("status") {
            None => ItemStatus::default(),
            Some(raw) => match ItemStatus::parse(raw) {
                Some(status) => status,
                None => {
                    skip(format!("unknown status '{}'.", raw));
                    continue;
                }
            },
        };
        let serial = record.get("serial_number").map(str::to_string);
        if let Some(serial) = &serial {
            if items::serial_taken(conn, serial, None)? {
                skip(format!("serial number '{}' already exists.", serial));
                continue;
            }
        }
        let uid_no = record.get("uid_no").map(str::to_string);
        if let Some(uid_no) = &uid_no {
            if uid::uid_taken(conn, uid_no)? {
                skip(format!("UID '{}' already exists.", uid_no));
                continue;
            }
        }

        let form = ItemForm {
            item_name: item_name.to_string(),
            category_id: Some(category.id),
            description: record.get("description").map(str::to_string),
            serial_number: serial,
            quantity: Some(record.get("quantity").and_then(parse_int).unwrap_or(1)),
            price: Some(record.get("unit_price").and_then(parse_decimal).unwrap_or(Decimal::ZERO)),
            status: Some(status),
            location_id: Some(location.id),
            uid_no,
            ..Default::default()
        };
        match items::insert(conn, &form, user_id) {
            Ok(item) => {
                record_added(conn, &item, user_id)?;
                report.saved.push(item.uid_no);
            }
            Err(StoreError::Sqlite(e)) => return Err(StoreError::Sqlite(e)),
            Err(e) => report.skipped.push(format!("Row {}: {}", sheet_row, e)),
        }
    }

    report.log_summary(conn, user_id, "direct import")?;
    info!(saved = report.saved.len(), skipped = report.skipped.len(), "Direct import finished");
    Ok(report)
}
