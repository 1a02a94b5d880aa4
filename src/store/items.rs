//! Inventory items: validation, insertion with UID assignment, edits,
//! lookups, dashboard listing and transfers.
//!
//! Functions take a `&Connection`; write paths are expected to run inside
//! [`Database::transaction`](super::Database::transaction) so the item row,
//! its UID and the audit entry commit together.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{
    params, params_from_iter,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef},
    Connection, OptionalExtension, Row, ToSql,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::catalog;
use super::db::{clean, decimal_column, decimal_param, unique_violation_on, StoreError};
use super::kits;
use super::logs::{self, actions, contains_pattern, NewLog};
use super::technical;
use super::uid::{next_uid, today, uid_taken};
use super::{Page, PageRequest};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    #[serde(alias = "offline", alias = "OFFLINE")]
    Offline,
    #[serde(alias = "online", alias = "ONLINE")]
    Online,
    #[serde(alias = "assigned", alias = "ASSIGNED")]
    Assigned,
    #[serde(rename = "In Transit", alias = "IN_TRANSIT", alias = "in_transit")]
    InTransit,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Offline,
        ItemStatus::Online,
        ItemStatus::Assigned,
        ItemStatus::InTransit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Offline => "Offline",
            ItemStatus::Online => "Online",
            ItemStatus::Assigned => "Assigned",
            ItemStatus::InTransit => "In Transit",
        }
    }

    /// Lenient parse used for spreadsheet and form input
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('_', " ").as_str() {
            "offline" => Some(ItemStatus::Offline),
            "online" => Some(ItemStatus::Online),
            "assigned" => Some(ItemStatus::Assigned),
            "in transit" => Some(ItemStatus::InTransit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for ItemStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ItemStatus::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown item status '{}'", raw).into()))
    }
}

// ============================================================================
// Item records
// ============================================================================

/// Item row joined with the names of everything it references
#[derive(Debug, Clone, Serialize)]
pub struct InventoryItem {
    pub id: i64,
    pub item_name: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub category_prefix: Option<String>,
    pub description: Option<String>,
    pub invoice_number: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    pub uid_no: String,
    pub serial_number: Option<String>,
    pub quantity: i64,
    pub price: Decimal,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub project_id: Option<i64>,
    pub project_name: Option<String>,
    pub cpu: Option<String>,
    pub gpu: Option<String>,
    pub os: Option<String>,
    pub installed_software: Option<String>,
    pub owner_poc: Option<String>,
    pub last_transfer_date: Option<NaiveDate>,
    pub created_by: Option<i64>,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ITEM_SELECT: &str = "
SELECT i.id, i.item_name, i.category_id, c.name, c.prefix, i.description, i.invoice_number,
       i.is_deleted, i.deleted_at, i.status, i.uid_no, i.serial_number, i.quantity, i.price,
       i.location_id, l.name, i.project_id, p.name, i.cpu, i.gpu, i.os, i.installed_software,
       i.owner_poc, i.last_transfer_date, i.created_by, u.username, i.created_at, i.updated_at
FROM inventory_items i
LEFT JOIN item_categories c ON c.id = i.category_id
LEFT JOIN locations l ON l.id = i.location_id
LEFT JOIN projects p ON p.id = i.project_id
LEFT JOIN users u ON u.id = i.created_by";

fn map_item(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        item_name: row.get(1)?,
        category_id: row.get(2)?,
        category_name: row.get(3)?,
        category_prefix: row.get(4)?,
        description: row.get(5)?,
        invoice_number: row.get(6)?,
        is_deleted: row.get(7)?,
        deleted_at: row.get(8)?,
        status: row.get(9)?,
        uid_no: row.get(10)?,
        serial_number: row.get(11)?,
        quantity: row.get(12)?,
        price: decimal_column(row, 13)?,
        location_id: row.get(14)?,
        location_name: row.get(15)?,
        project_id: row.get(16)?,
        project_name: row.get(17)?,
        cpu: row.get(18)?,
        gpu: row.get(19)?,
        os: row.get(20)?,
        installed_software: row.get(21)?,
        owner_poc: row.get(22)?,
        last_transfer_date: row.get(23)?,
        created_by: row.get(24)?,
        created_by_name: row.get(25)?,
        created_at: row.get(26)?,
        updated_at: row.get(27)?,
    })
}

/// Fields accepted when adding an item
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemForm {
    pub item_name: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub gpu: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub installed_software: Option<String>,
    #[serde(default)]
    pub owner_poc: Option<String>,
    /// Pre-assigned UID (imports); generated when absent
    #[serde(skip)]
    pub uid_no: Option<String>,
}

/// Validated and normalized item fields
struct ValidItem {
    item_name: String,
    category_id: Option<i64>,
    description: Option<String>,
    invoice_number: Option<String>,
    serial_number: Option<String>,
    quantity: i64,
    price: Decimal,
    status: ItemStatus,
    location_id: Option<i64>,
    project_id: Option<i64>,
    cpu: Option<String>,
    gpu: Option<String>,
    os: Option<String>,
    installed_software: Option<String>,
    owner_poc: Option<String>,
}

impl ItemForm {
    fn validated(&self) -> Result<ValidItem, StoreError> {
        let item_name = self.item_name.trim();
        if item_name.is_empty() {
            return Err(StoreError::invalid("Item name is required"));
        }
        if item_name.chars().count() > 255 {
            return Err(StoreError::invalid("Item name must be at most 255 characters"));
        }
        let quantity = self.quantity.unwrap_or(1);
        if quantity < 1 {
            return Err(StoreError::invalid("Quantity must be at least 1"));
        }
        let price = self.price.unwrap_or(Decimal::ZERO);
        if price < Decimal::ZERO {
            return Err(StoreError::invalid("Price cannot be negative"));
        }

        Ok(ValidItem {
            item_name: item_name.to_string(),
            category_id: self.category_id,
            description: clean(self.description.clone()),
            invoice_number: clean(self.invoice_number.clone()),
            serial_number: clean(self.serial_number.clone()),
            quantity,
            price: price.round_dp(2),
            status: self.status.unwrap_or_default(),
            location_id: self.location_id,
            project_id: self.project_id,
            cpu: clean(self.cpu.clone()),
            gpu: clean(self.gpu.clone()),
            os: clean(self.os.clone()),
            installed_software: clean(self.installed_software.clone()),
            owner_poc: clean(self.owner_poc.clone()),
        })
    }
}

/// Partial edit: absent fields are left untouched.
///
/// Nullable references distinguish "absent" from an explicit `null`,
/// which clears the reference (or every kit membership for `kit_id`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<i64>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub location_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub project_id: Option<Option<i64>>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub gpu: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub installed_software: Option<String>,
    #[serde(default)]
    pub owner_poc: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub kit_id: Option<Option<i64>>,
}

/// A present field (even `null`) becomes `Some`
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ItemPatch {
    fn apply(&self, item: &InventoryItem) -> ItemForm {
        fn pick(patch: &Option<String>, current: &Option<String>) -> Option<String> {
            patch.clone().or_else(|| current.clone())
        }
        ItemForm {
            item_name: self
                .item_name
                .clone()
                .unwrap_or_else(|| item.item_name.clone()),
            category_id: self.category_id.unwrap_or(item.category_id),
            description: pick(&self.description, &item.description),
            invoice_number: pick(&self.invoice_number, &item.invoice_number),
            serial_number: pick(&self.serial_number, &item.serial_number),
            quantity: Some(self.quantity.unwrap_or(item.quantity)),
            price: Some(self.price.unwrap_or(item.price)),
            status: Some(self.status.unwrap_or(item.status)),
            location_id: self.location_id.unwrap_or(item.location_id),
            project_id: self.project_id.unwrap_or(item.project_id),
            cpu: pick(&self.cpu, &item.cpu),
            gpu: pick(&self.gpu, &item.gpu),
            os: pick(&self.os, &item.os),
            installed_software: pick(&self.installed_software, &item.installed_software),
            owner_poc: pick(&self.owner_poc, &item.owner_poc),
            uid_no: None,
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Make sure every referenced row exists; returns the category prefix
fn check_references(conn: &Connection, item: &ValidItem) -> Result<Option<String>, StoreError> {
    let prefix = match item.category_id {
        Some(id) => Some(
            catalog::get_category(conn, id)?
                .ok_or_else(|| StoreError::invalid(format!("Category {} does not exist", id)))?
                .prefix,
        ),
        None => None,
    };
    if let Some(id) = item.location_id {
        if catalog::get_location(conn, id)?.is_none() {
            return Err(StoreError::invalid(format!("Location {} does not exist", id)));
        }
    }
    if let Some(id) = item.project_id {
        if catalog::get_project(conn, id)?.is_none() {
            return Err(StoreError::invalid(format!("Project {} does not exist", id)));
        }
    }
    Ok(prefix)
}

/// Insert an item, assigning a UID unless the form carries one.
///
/// Does not check invoice numbers (several scanned items share one) and
/// does not write an audit entry.
pub fn insert(
    conn: &Connection,
    form: &ItemForm,
    created_by: Option<i64>,
) -> Result<InventoryItem, StoreError> {
    let item = form.validated()?;
    let prefix = check_references(conn, &item)?;

    if let Some(serial) = &item.serial_number {
        if serial_taken(conn, serial, None)? {
            return Err(StoreError::Conflict(format!(
                "Serial number '{}' already exists",
                serial
            )));
        }
    }

    let uid = match clean(form.uid_no.clone()) {
        Some(uid) => {
            if uid_taken(conn, &uid)? {
                return Err(StoreError::Conflict(format!("UID '{}' already exists", uid)));
            }
            uid
        }
        None => next_uid(conn, prefix.as_deref(), today())?,
    };

    let now = Utc::now();
    conn.execute(
        "INSERT INTO inventory_items (
            item_name, category_id, description, invoice_number, status, uid_no, serial_number,
            quantity, price, location_id, project_id, cpu, gpu, os, installed_software, owner_poc,
            created_by, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)",
        params![
            item.item_name,
            item.category_id,
            item.description,
            item.invoice_number,
            item.status,
            uid,
            item.serial_number,
            item.quantity,
            decimal_param(item.price),
            item.location_id,
            item.project_id,
            item.cpu,
            item.gpu,
            item.os,
            item.installed_software,
            item.owner_poc,
            created_by,
            now,
        ],
    )
    .map_err(|e| {
        unique_violation_on(e, &["inventory_items.uid_no", "inventory_items.serial_number"], || {
            format!("Item with UID '{}' or serial number already exists", uid)
        })
    })?;

    let id = conn.last_insert_rowid();
    get(conn, id)?.ok_or_else(|| StoreError::not_found(format!("Item {}", id)))
}

/// Add a single item from the form: invoice check, insert, OS onto the
/// technical record, audit entry
pub fn add(
    conn: &Connection,
    form: &ItemForm,
    user_id: Option<i64>,
) -> Result<InventoryItem, StoreError> {
    if let Some(invoice) = clean(form.invoice_number.clone()) {
        if invoice_number_taken(conn, &invoice, None)? {
            return Err(StoreError::Conflict(format!(
                "Invoice number '{}' already exists.",
                invoice
            )));
        }
    }

    let item = insert(conn, form, user_id)?;
    if let Some(os) = &item.os {
        technical::set_os(conn, item.id, os)?;
    }

    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::ITEM_ADDED,
            format!(
                "Asset '{}' was added with UID {}.",
                item.item_name, item.uid_no
            ),
        )
        .item(item.id, &item.uid_no),
    )?;
    Ok(item)
}

/// Apply a partial edit to a live item
pub fn update(
    conn: &Connection,
    id: i64,
    patch: &ItemPatch,
    user_id: Option<i64>,
) -> Result<InventoryItem, StoreError> {
    let before = get_live(conn, id)?;
    let item = patch.apply(&before).validated()?;
    check_references(conn, &item)?;

    if let Some(serial) = &item.serial_number {
        if serial_taken(conn, serial, Some(id))? {
            return Err(StoreError::Conflict(format!(
                "Serial number '{}' already exists",
                serial
            )));
        }
    }
    if let Some(invoice) = &item.invoice_number {
        if invoice_number_taken(conn, invoice, Some(id))? {
            return Err(StoreError::Conflict(format!(
                "Invoice number '{}' already exists.",
                invoice
            )));
        }
    }

    conn.execute(
        "UPDATE inventory_items SET
            item_name = ?1, category_id = ?2, description = ?3, invoice_number = ?4, status = ?5,
            serial_number = ?6, quantity = ?7, price = ?8, location_id = ?9, project_id = ?10,
            cpu = ?11, gpu = ?12, os = ?13, installed_software = ?14, owner_poc = ?15,
            updated_at = ?16
         WHERE id = ?17",
        params![
            item.item_name,
            item.category_id,
            item.description,
            item.invoice_number,
            item.status,
            item.serial_number,
            item.quantity,
            decimal_param(item.price),
            item.location_id,
            item.project_id,
            item.cpu,
            item.gpu,
            item.os,
            item.installed_software,
            item.owner_poc,
            Utc::now(),
            id,
        ],
    )
    .map_err(|e| {
        unique_violation_on(e, &["inventory_items.serial_number"], || {
            "Serial number already exists".to_string()
        })
    })?;

    if let Some(kit_id) = patch.kit_id {
        kits::set_item_kit(conn, id, kit_id)?;
    }

    let after = get(conn, id)?.ok_or_else(|| StoreError::not_found(format!("Item {}", id)))?;
    let changes = describe_changes(&before, &after);
    let details = if changes.is_empty() {
        format!("Item '{}' updated via edit form.", after.item_name)
    } else {
        format!("Item '{}' updated: {}.", after.item_name, changes.join("; "))
    };
    logs::record(
        conn,
        &NewLog::new(user_id, actions::ITEM_UPDATED, details).item(id, &after.uid_no),
    )?;
    Ok(after)
}

fn describe_changes(before: &InventoryItem, after: &InventoryItem) -> Vec<String> {
    fn show(value: Option<String>) -> String {
        value.unwrap_or_else(|| "None".to_string())
    }
    let pairs: [(&str, String, String); 15] = [
        ("Item Name", before.item_name.clone(), after.item_name.clone()),
        ("Category", show(before.category_name.clone()), show(after.category_name.clone())),
        ("Description", show(before.description.clone()), show(after.description.clone())),
        ("Invoice Number", show(before.invoice_number.clone()), show(after.invoice_number.clone())),
        ("Serial Number", show(before.serial_number.clone()), show(after.serial_number.clone())),
        ("Quantity", before.quantity.to_string(), after.quantity.to_string()),
        ("Price", before.price.to_string(), after.price.to_string()),
        ("Status", before.status.to_string(), after.status.to_string()),
        ("Location", show(before.location_name.clone()), show(after.location_name.clone())),
        ("Project", show(before.project_name.clone()), show(after.project_name.clone())),
        ("CPU", show(before.cpu.clone()), show(after.cpu.clone())),
        ("GPU", show(before.gpu.clone()), show(after.gpu.clone())),
        ("OS", show(before.os.clone()), show(after.os.clone())),
        (
            "Installed Software",
            show(before.installed_software.clone()),
            show(after.installed_software.clone()),
        ),
        ("Owner POC", show(before.owner_poc.clone()), show(after.owner_poc.clone())),
    ];
    pairs
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(field, old, new)| format!("{}: '{}' to '{}'", field, old, new))
        .collect()
}

/// Destination of a transfer
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    pub location_id: i64,
    /// `None` keeps the project, `Some(None)` clears it
    pub project_id: Option<Option<i64>>,
    pub transfer_date: Option<NaiveDate>,
    pub owner_poc: Option<String>,
}

/// Move a live item to a new location and mark it In Transit
pub fn transfer(
    conn: &Connection,
    id: i64,
    transfer: &Transfer,
    user_id: Option<i64>,
) -> Result<InventoryItem, StoreError> {
    let item = get_live(conn, id)?;
    let location = catalog::get_location(conn, transfer.location_id)?.ok_or_else(|| {
        StoreError::not_found(format!("New location with ID {}", transfer.location_id))
    })?;
    let project = match transfer.project_id {
        Some(Some(project_id)) => Some(Some(catalog::get_project(conn, project_id)?.ok_or_else(
            || StoreError::not_found(format!("Project with ID {}", project_id)),
        )?)),
        Some(None) => Some(None),
        None => None,
    };
    let project_id = match &project {
        Some(p) => p.as_ref().map(|p| p.id),
        None => item.project_id,
    };
    let owner_poc = clean(transfer.owner_poc.clone()).or_else(|| item.owner_poc.clone());

    conn.execute(
        "UPDATE inventory_items SET location_id = ?1, project_id = ?2, status = ?3,
            last_transfer_date = COALESCE(?4, last_transfer_date), owner_poc = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            location.id,
            project_id,
            ItemStatus::InTransit,
            transfer.transfer_date,
            owner_poc,
            Utc::now(),
            id,
        ],
    )?;

    let mut details = format!(
        "Transferred item '{}' (UID: {}) from Location: '{}' to '{}'.",
        item.item_name,
        item.uid_no,
        item.location_name.as_deref().unwrap_or("N/A"),
        location.name
    );
    if let Some(new_project) = &project {
        details.push_str(&format!(
            " Project changed from '{}' to '{}'.",
            item.project_name.as_deref().unwrap_or("N/A"),
            new_project.as_ref().map(|p| p.name.as_str()).unwrap_or("N/A")
        ));
    }
    if let Some(date) = transfer.transfer_date {
        details.push_str(&format!(" Transfer Date: {}.", date.format("%Y-%m-%d")));
    }
    logs::record(
        conn,
        &NewLog::new(user_id, actions::TRANSFERRED, details).item(id, &item.uid_no),
    )?;

    get(conn, id)?.ok_or_else(|| StoreError::not_found(format!("Item {}", id)))
}

// ============================================================================
// Reads
// ============================================================================

/// Item by id, deleted or not
pub fn get(conn: &Connection, id: i64) -> Result<Option<InventoryItem>, StoreError> {
    Ok(conn
        .query_row(&format!("{} WHERE i.id = ?1", ITEM_SELECT), [id], map_item)
        .optional()?)
}

/// Item by id; soft-deleted items count as missing
pub fn get_live(conn: &Connection, id: i64) -> Result<InventoryItem, StoreError> {
    get(conn, id)?
        .filter(|item| !item.is_deleted)
        .ok_or_else(|| StoreError::not_found(format!("Item {}", id)))
}

/// Resolve a UID first, then a numeric id
pub fn find_by_key(conn: &Connection, key: &str) -> Result<Option<InventoryItem>, StoreError> {
    let key = key.trim();
    let by_uid = conn
        .query_row(&format!("{} WHERE i.uid_no = ?1", ITEM_SELECT), [key], map_item)
        .optional()?;
    if by_uid.is_some() {
        return Ok(by_uid);
    }
    match key.parse::<i64>() {
        Ok(id) => get(conn, id),
        Err(_) => Ok(None),
    }
}

/// Live items whose UID or serial number equals `term`, ignoring case
pub fn search_exact(conn: &Connection, term: &str) -> Result<Vec<InventoryItem>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE i.is_deleted = 0
           AND (LOWER(i.uid_no) = LOWER(?1) OR LOWER(i.serial_number) = LOWER(?1))
         ORDER BY i.id",
        ITEM_SELECT
    ))?;
    let items = stmt
        .query_map([term.trim()], map_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn serial_taken(
    conn: &Connection,
    serial: &str,
    exclude_id: Option<i64>,
) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM inventory_items WHERE serial_number = ?1 AND id != COALESCE(?2, -1)",
            params![serial, exclude_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn invoice_number_taken(
    conn: &Connection,
    invoice: &str,
    exclude_id: Option<i64>,
) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM inventory_items WHERE invoice_number = ?1 AND id != COALESCE(?2, -1)
             LIMIT 1",
            params![invoice, exclude_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn count_live(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM inventory_items WHERE is_deleted = 0",
        [],
        |r| r.get(0),
    )?)
}

/// Live items ordered by name, optionally restricted to `ids`
pub fn list_live(conn: &Connection, ids: Option<&[i64]>) -> Result<Vec<InventoryItem>, StoreError> {
    let (filter, args): (String, Vec<Value>) = match ids {
        Some([]) => return Ok(Vec::new()),
        Some(ids) => (
            format!(" AND i.id IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| Value::Integer(*id)).collect(),
        ),
        None => (String::new(), Vec::new()),
    };
    let mut stmt = conn.prepare(&format!(
        "{} WHERE i.is_deleted = 0{} ORDER BY i.item_name, i.id",
        ITEM_SELECT, filter
    ))?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), map_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Dashboard sort columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    ItemName,
    UidNo,
    SerialNumber,
    Quantity,
    Price,
    Status,
    CreatedAt,
    UpdatedAt,
    LocationName,
    ProjectName,
}

impl SortField {
    /// Unknown keys fall back to the item name
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).unwrap_or_default() {
            "uid_no" => SortField::UidNo,
            "serial_number" => SortField::SerialNumber,
            "quantity" => SortField::Quantity,
            "price" => SortField::Price,
            "status" => SortField::Status,
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            "location__name" => SortField::LocationName,
            "project__name" => SortField::ProjectName,
            _ => SortField::ItemName,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            SortField::ItemName => "item_name",
            SortField::UidNo => "uid_no",
            SortField::SerialNumber => "serial_number",
            SortField::Quantity => "quantity",
            SortField::Price => "price",
            SortField::Status => "status",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::LocationName => "location__name",
            SortField::ProjectName => "project__name",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortField::ItemName => "i.item_name",
            SortField::UidNo => "i.uid_no",
            SortField::SerialNumber => "i.serial_number",
            SortField::Quantity => "i.quantity",
            SortField::Price => "CAST(i.price AS REAL)",
            SortField::Status => "i.status",
            SortField::CreatedAt => "i.created_at",
            SortField::UpdatedAt => "i.updated_at",
            SortField::LocationName => "l.name",
            SortField::ProjectName => "p.name",
        }
    }
}

/// Dashboard listing options
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub search: Option<String>,
    pub sort: SortField,
    pub descending: bool,
}

pub fn list_dashboard(
    conn: &Connection,
    query: &ItemQuery,
    page: PageRequest,
) -> Result<Page<InventoryItem>, StoreError> {
    let mut where_sql = String::from(" WHERE i.is_deleted = 0");
    let mut args: Vec<Value> = Vec::new();
    if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        where_sql.push_str(
            " AND (LOWER(i.item_name) LIKE ?1 ESCAPE '\\'
               OR LOWER(i.uid_no) LIKE ?1 ESCAPE '\\'
               OR LOWER(i.serial_number) LIKE ?1 ESCAPE '\\'
               OR LOWER(l.name) LIKE ?1 ESCAPE '\\'
               OR LOWER(i.status) LIKE ?1 ESCAPE '\\'
               OR LOWER(i.description) LIKE ?1 ESCAPE '\\')",
        );
        args.push(Value::Text(contains_pattern(term)));
    }

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM inventory_items i
             LEFT JOIN locations l ON l.id = i.location_id{}",
            where_sql
        ),
        params_from_iter(args.iter()),
        |r| r.get(0),
    )?;
    let (page_no, num_pages, offset) = page.resolve(total as u64);

    let direction = if query.descending { "DESC" } else { "ASC" };
    let sql = format!(
        "{}{} ORDER BY {} {}, i.id {} LIMIT {} OFFSET {}",
        ITEM_SELECT,
        where_sql,
        query.sort.column(),
        direction,
        direction,
        page.page_size,
        offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(args.iter()), map_item)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page: page_no,
        page_size: page.page_size,
        num_pages,
        total: total as u64,
    })
}

/// Coarse classification shown on the details page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemType {
    Technical,
    General,
}

const TECHNICAL_KEYWORDS: [&str; 10] = [
    "laptop",
    "server",
    "desktop",
    "docking station",
    "cpu",
    "gpu",
    "pc",
    "computer",
    "macbook",
    "workstation",
];

pub fn item_type(item_name: &str) -> ItemType {
    let name = item_name.to_lowercase();
    if TECHNICAL_KEYWORDS.iter().any(|k| name.contains(k)) {
        ItemType::Technical
    } else {
        ItemType::General
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::catalog::{CategoryForm, LocationForm};
    use crate::store::Database;
    use std::str::FromStr;

    /// Category "Laptop" (LAP) and location "HQ"; returns their ids
    pub(crate) fn seed(conn: &Connection) -> (i64, i64) {
        let category = catalog::create_category(
            conn,
            &CategoryForm {
                name: "Laptop".into(),
                prefix: "LAP".into(),
            },
        )
        .unwrap();
        let location = catalog::create_location(
            conn,
            &LocationForm {
                name: "HQ".into(),
                ..Default::default()
            },
        )
        .unwrap();
        (category.id, location.id)
    }

    pub(crate) fn form(name: &str, category_id: Option<i64>, serial: Option<&str>) -> ItemForm {
        ItemForm {
            item_name: name.into(),
            category_id,
            serial_number: serial.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_assigns_uid_and_logs() {
        let db = Database::in_memory().unwrap();
        let (item, entries) = db
            .transaction(|tx| {
                let (category, _) = seed(tx);
                let item = add(tx, &form("ThinkPad", Some(category), Some("SN-1")), None)?;
                Ok((item, logs::all(tx, &Default::default())?))
            })
            .await
            .unwrap();

        assert!(item.uid_no.starts_with("LAP"));
        assert!(item.uid_no.ends_with("0001"));
        assert_eq!(item.status, ItemStatus::Offline);
        assert_eq!(item.quantity, 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, actions::ITEM_ADDED);
        assert_eq!(entries[0].uid_number.as_deref(), Some(item.uid_no.as_str()));
    }

    #[tokio::test]
    async fn duplicate_serial_and_invoice_are_rejected() {
        let db = Database::in_memory().unwrap();
        let (serial, invoice) = db
            .transaction(|tx| {
                let mut first = form("Dock", None, Some("SN-9"));
                first.invoice_number = Some("INV-1".into());
                add(tx, &first, None)?;

                let serial = add(tx, &form("Dock 2", None, Some("SN-9")), None);
                let mut second = form("Dock 3", None, None);
                second.invoice_number = Some("INV-1".into());
                let invoice = add(tx, &second, None);
                Ok((serial, invoice))
            })
            .await
            .unwrap();
        assert!(matches!(serial, Err(StoreError::Conflict(m)) if m.contains("SN-9")));
        assert!(matches!(invoice, Err(StoreError::Conflict(m)) if m.contains("INV-1")));
    }

    #[tokio::test]
    async fn validation_rejects_bad_input() {
        let db = Database::in_memory().unwrap();
        let results = db
            .call(|conn| {
                let mut zero = form("Cable", None, None);
                zero.quantity = Some(0);
                let mut negative = form("Cable", None, None);
                negative.price = Some(Decimal::from_str("-1.00").unwrap());
                let missing_category = form("Cable", Some(99), None);
                Ok(vec![
                    insert(conn, &form("  ", None, None), None).is_err(),
                    insert(conn, &zero, None).is_err(),
                    insert(conn, &negative, None).is_err(),
                    insert(conn, &missing_category, None).is_err(),
                ])
            })
            .await
            .unwrap();
        assert_eq!(results, vec![true, true, true, true]);
    }

    #[tokio::test]
    async fn update_is_partial_and_logs_changes() {
        let db = Database::in_memory().unwrap();
        let (updated, entries) = db
            .transaction(|tx| {
                let (category, location) = seed(tx);
                let mut f = form("ThinkPad", Some(category), Some("SN-1"));
                f.description = Some("14 inch".into());
                let item = insert(tx, &f, None)?;

                let patch: ItemPatch = serde_json::from_value(serde_json::json!({
                    "status": "Online",
                    "location_id": location,
                    "category_id": null
                }))
                .unwrap();
                let updated = update(tx, item.id, &patch, None)?;
                Ok((updated, logs::all(tx, &Default::default())?))
            })
            .await
            .unwrap();

        assert_eq!(updated.status, ItemStatus::Online);
        assert_eq!(updated.location_name.as_deref(), Some("HQ"));
        assert_eq!(updated.category_id, None);
        assert_eq!(updated.description.as_deref(), Some("14 inch"));
        assert!(updated.uid_no.starts_with("LAP"));
        assert!(entries[0].details.contains("Status: 'Offline' to 'Online'"));
        assert!(entries[0].details.contains("Location: 'None' to 'HQ'"));
    }

    #[tokio::test]
    async fn transfer_sets_in_transit() {
        let db = Database::in_memory().unwrap();
        let moved = db
            .transaction(|tx| {
                let (_, location) = seed(tx);
                let item = insert(tx, &form("Monitor", None, None), None)?;
                transfer(
                    tx,
                    item.id,
                    &Transfer {
                        location_id: location,
                        transfer_date: NaiveDate::from_ymd_opt(2025, 10, 1),
                        owner_poc: Some("Dana".into()),
                        ..Default::default()
                    },
                    None,
                )
            })
            .await
            .unwrap();
        assert_eq!(moved.status, ItemStatus::InTransit);
        assert_eq!(moved.owner_poc.as_deref(), Some("Dana"));
        assert_eq!(moved.last_transfer_date, NaiveDate::from_ymd_opt(2025, 10, 1));
    }

    #[tokio::test]
    async fn dashboard_searches_sorts_and_hides_deleted() {
        let db = Database::in_memory().unwrap();
        let (page, desc) = db
            .transaction(|tx| {
                let (_, location) = seed(tx);
                let mut a = form("Alpha dock", None, None);
                a.location_id = Some(location);
                insert(tx, &a, None)?;
                insert(tx, &form("Beta dock", None, None), None)?;
                let gone = insert(tx, &form("Gamma dock", None, None), None)?;
                tx.execute("UPDATE inventory_items SET is_deleted = 1 WHERE id = ?1", [gone.id])?;

                let page = list_dashboard(
                    tx,
                    &ItemQuery {
                        search: Some("DOCK".into()),
                        ..Default::default()
                    },
                    PageRequest::default(),
                )?;
                let desc = list_dashboard(
                    tx,
                    &ItemQuery {
                        search: Some("hq".into()),
                        sort: SortField::parse(Some("location__name")),
                        descending: true,
                    },
                    PageRequest::default(),
                )?;
                Ok((page, desc))
            })
            .await
            .unwrap();

        let names: Vec<_> = page.items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha dock", "Beta dock"]);
        assert_eq!(desc.total, 1);
    }

    #[tokio::test]
    async fn lookups_by_uid_serial_and_id() {
        let db = Database::in_memory().unwrap();
        let (by_uid, by_id, matches) = db
            .transaction(|tx| {
                let item = insert(tx, &form("Server", None, Some("abc-1")), None)?;
                let by_uid = find_by_key(tx, &item.uid_no)?.map(|i| i.id);
                let by_id = find_by_key(tx, &item.id.to_string())?.map(|i| i.id);
                let matches = search_exact(tx, "ABC-1")?.len();
                Ok((by_uid, by_id, matches))
            })
            .await
            .unwrap();
        assert_eq!(by_uid, by_id);
        assert_eq!(matches, 1);
    }

    #[test]
    fn status_parsing_accepts_legacy_forms() {
        assert_eq!(ItemStatus::parse("IN_TRANSIT"), Some(ItemStatus::InTransit));
        assert_eq!(ItemStatus::parse(" online "), Some(ItemStatus::Online));
        assert_eq!(ItemStatus::parse("lost"), None);
        let parsed: ItemStatus = serde_json::from_str("\"In Transit\"").unwrap();
        assert_eq!(parsed, ItemStatus::InTransit);
    }

    #[test]
    fn item_type_by_keywords() {
        assert_eq!(item_type("Dell Docking Station"), ItemType::Technical);
        assert_eq!(item_type("Office chair"), ItemType::General);
    }
}
