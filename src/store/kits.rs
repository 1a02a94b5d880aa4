//! Kits: named groups of items

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::db::{unique_violation, StoreError};
use super::items::{self, InventoryItem};
use super::logs::{self, actions, NewLog};

#[derive(Debug, Clone, Serialize)]
pub struct Kit {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Live members
    pub item_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KitDetail {
    pub kit: Kit,
    pub items: Vec<InventoryItem>,
    /// Live items that are not members yet
    pub available_items: Vec<InventoryItem>,
}

const KIT_SELECT: &str = "
SELECT k.id, k.name, k.created_at,
       (SELECT COUNT(*) FROM kit_items ki JOIN inventory_items i ON i.id = ki.item_id
        WHERE ki.kit_id = k.id AND i.is_deleted = 0)
FROM kits k";

fn map_kit(row: &Row<'_>) -> rusqlite::Result<Kit> {
    Ok(Kit {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        item_count: row.get(3)?,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Kit>, StoreError> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY k.name", KIT_SELECT))?;
    let kits = stmt.query_map([], map_kit)?.collect::<Result<Vec<_>, _>>()?;
    Ok(kits)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Kit>, StoreError> {
    Ok(conn
        .query_row(&format!("{} WHERE k.id = ?1", KIT_SELECT), [id], map_kit)
        .optional()?)
}

fn get_by_name(conn: &Connection, name: &str) -> Result<Option<Kit>, StoreError> {
    Ok(conn
        .query_row(&format!("{} WHERE k.name = ?1", KIT_SELECT), [name], map_kit)
        .optional()?)
}

/// Get or create the kit `name` and make its membership exactly the live
/// items among `item_ids`
pub fn create(
    conn: &Connection,
    name: &str,
    item_ids: &[i64],
    user_id: Option<i64>,
) -> Result<Kit, StoreError> {
    let name = name.trim();
    if name.is_empty() || item_ids.is_empty() {
        return Err(StoreError::invalid("Kit name and items are required."));
    }
    if name.chars().count() > 100 {
        return Err(StoreError::invalid("Kit name must be at most 100 characters"));
    }
    let members = items::list_live(conn, Some(item_ids))?;
    if members.is_empty() {
        return Err(StoreError::invalid("None of the selected items exist."));
    }

    let kit_id = match get_by_name(conn, name)? {
        Some(kit) => kit.id,
        None => {
            conn.execute(
                "INSERT INTO kits (name, created_at) VALUES (?1, ?2)",
                params![name, Utc::now()],
            )
            .map_err(|e| unique_violation(e, || format!("Kit '{}' already exists", name)))?;
            conn.last_insert_rowid()
        }
    };

    conn.execute("DELETE FROM kit_items WHERE kit_id = ?1", [kit_id])?;
    for item in &members {
        conn.execute(
            "INSERT INTO kit_items (kit_id, item_id) VALUES (?1, ?2)",
            params![kit_id, item.id],
        )?;
    }

    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::KIT_CREATED,
            format!("Kit '{}' created with {} items.", name, members.len()),
        ),
    )?;
    get(conn, kit_id)?.ok_or_else(|| StoreError::not_found(format!("Kit {}", kit_id)))
}

pub fn detail(conn: &Connection, id: i64) -> Result<KitDetail, StoreError> {
    let kit = get(conn, id)?.ok_or_else(|| StoreError::not_found(format!("Kit {}", id)))?;
    let member_ids = member_ids(conn, id)?;
    let items = items::list_live(conn, Some(&member_ids))?;
    let available_items = items::list_live(conn, None)?
        .into_iter()
        .filter(|item| !member_ids.contains(&item.id))
        .collect();
    Ok(KitDetail {
        kit,
        items,
        available_items,
    })
}

fn member_ids(conn: &Connection, kit_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT item_id FROM kit_items WHERE kit_id = ?1")?;
    let ids = stmt
        .query_map([kit_id], |r| r.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn add_item(
    conn: &Connection,
    kit_id: i64,
    item_id: i64,
    user_id: Option<i64>,
) -> Result<(Kit, InventoryItem), StoreError> {
    let kit = get(conn, kit_id)?.ok_or_else(|| StoreError::not_found(format!("Kit {}", kit_id)))?;
    let item = items::get_live(conn, item_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO kit_items (kit_id, item_id) VALUES (?1, ?2)",
        params![kit_id, item_id],
    )?;
    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::ADDED_TO_KIT,
            format!(
                "Item '{}' (UID {}) added to Kit '{}'.",
                item.item_name, item.uid_no, kit.name
            ),
        )
        .item(item.id, &item.uid_no),
    )?;
    Ok((kit, item))
}

pub fn remove_item(
    conn: &Connection,
    kit_id: i64,
    item_id: i64,
    user_id: Option<i64>,
) -> Result<(Kit, InventoryItem), StoreError> {
    let kit = get(conn, kit_id)?.ok_or_else(|| StoreError::not_found(format!("Kit {}", kit_id)))?;
    let item = items::get(conn, item_id)?
        .ok_or_else(|| StoreError::not_found(format!("Item {}", item_id)))?;
    let removed = conn.execute(
        "DELETE FROM kit_items WHERE kit_id = ?1 AND item_id = ?2",
        params![kit_id, item_id],
    )?;
    if removed == 0 {
        return Err(StoreError::not_found(format!(
            "Item '{}' in kit '{}'",
            item.item_name, kit.name
        )));
    }
    logs::record(
        conn,
        &NewLog::new(
            user_id,
            actions::REMOVED_FROM_KIT,
            format!("Item '{}' removed from Kit '{}'.", item.item_name, kit.name),
        )
        .item(item.id, &item.uid_no),
    )?;
    Ok((kit, item))
}

/// Names of the kits holding `item_id`, sorted
pub fn kit_names_for_item(conn: &Connection, item_id: i64) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT k.name FROM kits k JOIN kit_items ki ON ki.kit_id = k.id
         WHERE ki.item_id = ?1 ORDER BY k.name",
    )?;
    let names = stmt
        .query_map([item_id], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Make `kit_id` the only kit of the item, or clear every membership
pub fn set_item_kit(conn: &Connection, item_id: i64, kit_id: Option<i64>) -> Result<(), StoreError> {
    if let Some(kit_id) = kit_id {
        if get(conn, kit_id)?.is_none() {
            return Err(StoreError::invalid(format!("Kit {} does not exist", kit_id)));
        }
    }
    conn.execute("DELETE FROM kit_items WHERE item_id = ?1", [item_id])?;
    if let Some(kit_id) = kit_id {
        conn.execute(
            "INSERT INTO kit_items (kit_id, item_id) VALUES (?1, ?2)",
            params![kit_id, item_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::items::tests::form;
    use crate::store::lifecycle;
    use crate::store::Database;

    #[tokio::test]
    async fn create_replaces_membership_of_existing_kit() {
        let db = Database::in_memory().unwrap();
        let (first, second, names) = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("Laptop", None, None), None)?;
                let b = items::insert(tx, &form("Charger", None, None), None)?;
                let first = create(tx, "Field kit", &[a.id, b.id], None)?;
                let second = create(tx, "Field kit", &[b.id], None)?;
                Ok((first, second, kit_names_for_item(tx, a.id)?))
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.item_count, 2);
        assert_eq!(second.item_count, 1);
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn detail_lists_members_and_candidates() {
        let db = Database::in_memory().unwrap();
        let detail = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("Laptop", None, None), None)?;
                items::insert(tx, &form("Mouse", None, None), None)?;
                let c = items::insert(tx, &form("Old mouse", None, None), None)?;
                lifecycle::soft_delete(tx, &[c.id], None, None)?;
                let kit = create(tx, "Desk", &[a.id], None)?;
                detail(tx, kit.id)
            })
            .await
            .unwrap();
        assert_eq!(detail.items.len(), 1);
        let available: Vec<_> = detail.available_items.iter().map(|i| i.item_name.as_str()).collect();
        assert_eq!(available, vec!["Mouse"]);
    }

    #[tokio::test]
    async fn removing_a_non_member_is_not_found() {
        let db = Database::in_memory().unwrap();
        let result = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("Laptop", None, None), None)?;
                let b = items::insert(tx, &form("Mouse", None, None), None)?;
                let kit = create(tx, "Desk", &[a.id], None)?;
                remove_item(tx, kit.id, b.id, None)
            })
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn set_item_kit_moves_and_clears() {
        let db = Database::in_memory().unwrap();
        let (moved, cleared) = db
            .transaction(|tx| {
                let a = items::insert(tx, &form("Laptop", None, None), None)?;
                create(tx, "One", &[a.id], None)?;
                let two = create(tx, "Two", &[a.id], None)?;
                set_item_kit(tx, a.id, Some(two.id))?;
                let moved = kit_names_for_item(tx, a.id)?;
                set_item_kit(tx, a.id, None)?;
                Ok((moved, kit_names_for_item(tx, a.id)?))
            })
            .await
            .unwrap();
        assert_eq!(moved, vec!["Two".to_string()]);
        assert!(cleared.is_empty());
    }
}
