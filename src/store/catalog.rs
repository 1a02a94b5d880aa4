//! Reference data: item categories, locations, projects and document tags

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::db::{clean, unique_violation, StoreError};
use super::uid::normalize_prefix;

/// Name of the catch-all category used when nothing else matches
pub const OTHER_CATEGORY: &str = "Other";

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemCategory {
    pub id: i64,
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryForm {
    pub name: String,
    pub prefix: String,
}

impl CategoryForm {
    fn validated(&self) -> Result<(String, String), StoreError> {
        let name = required_name(&self.name, 100)?;
        let prefix = normalize_prefix(&self.prefix)?;
        Ok((name, prefix))
    }
}

fn map_category(row: &Row<'_>) -> rusqlite::Result<ItemCategory> {
    Ok(ItemCategory {
        id: row.get(0)?,
        name: row.get(1)?,
        prefix: row.get(2)?,
    })
}

pub fn list_categories(conn: &Connection) -> Result<Vec<ItemCategory>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, name, prefix FROM item_categories ORDER BY name")?;
    let rows = stmt
        .query_map([], map_category)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_category(conn: &Connection, id: i64) -> Result<Option<ItemCategory>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, prefix FROM item_categories WHERE id = ?1",
            [id],
            map_category,
        )
        .optional()?)
}

/// Case-insensitive lookup by name
pub fn find_category_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<ItemCategory>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, prefix FROM item_categories WHERE LOWER(name) = LOWER(?1)",
            [name.trim()],
            map_category,
        )
        .optional()?)
}

pub fn create_category(conn: &Connection, form: &CategoryForm) -> Result<ItemCategory, StoreError> {
    let (name, prefix) = form.validated()?;
    conn.execute(
        "INSERT INTO item_categories (name, prefix) VALUES (?1, ?2)",
        params![name, prefix],
    )
    .map_err(|e| unique_violation(e, || format!("Category '{}' or prefix '{}' already exists", name, prefix)))?;
    Ok(ItemCategory {
        id: conn.last_insert_rowid(),
        name,
        prefix,
    })
}

pub fn update_category(
    conn: &Connection,
    id: i64,
    form: &CategoryForm,
) -> Result<ItemCategory, StoreError> {
    let (name, prefix) = form.validated()?;
    let changed = conn
        .execute(
            "UPDATE item_categories SET name = ?1, prefix = ?2 WHERE id = ?3",
            params![name, prefix, id],
        )
        .map_err(|e| unique_violation(e, || format!("Category '{}' or prefix '{}' already exists", name, prefix)))?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("Category {}", id)));
    }
    Ok(ItemCategory { id, name, prefix })
}

pub fn delete_category(conn: &Connection, id: i64) -> Result<(), StoreError> {
    delete_by_id(conn, "item_categories", "Category", id)
}

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationForm {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl LocationForm {
    fn validated(&self) -> Result<Location, StoreError> {
        let phone_number = clean(self.phone_number.clone());
        if phone_number.as_deref().is_some_and(|p| p.chars().count() > 20) {
            return Err(StoreError::invalid("Phone number must be at most 20 characters"));
        }
        Ok(Location {
            id: 0,
            name: required_name(&self.name, 100)?,
            address: clean(self.address.clone()),
            contact_person: clean(self.contact_person.clone()),
            phone_number,
        })
    }
}

fn map_location(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        contact_person: row.get(3)?,
        phone_number: row.get(4)?,
    })
}

pub fn list_locations(conn: &Connection) -> Result<Vec<Location>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, address, contact_person, phone_number FROM locations ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], map_location)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_location(conn: &Connection, id: i64) -> Result<Option<Location>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, address, contact_person, phone_number FROM locations WHERE id = ?1",
            [id],
            map_location,
        )
        .optional()?)
}

pub fn create_location(conn: &Connection, form: &LocationForm) -> Result<Location, StoreError> {
    let mut location = form.validated()?;
    conn.execute(
        "INSERT INTO locations (name, address, contact_person, phone_number) VALUES (?1, ?2, ?3, ?4)",
        params![
            location.name,
            location.address,
            location.contact_person,
            location.phone_number
        ],
    )
    .map_err(|e| unique_violation(e, || format!("Location '{}' already exists", location.name)))?;
    location.id = conn.last_insert_rowid();
    Ok(location)
}

pub fn update_location(
    conn: &Connection,
    id: i64,
    form: &LocationForm,
) -> Result<Location, StoreError> {
    let mut location = form.validated()?;
    location.id = id;
    let changed = conn
        .execute(
            "UPDATE locations SET name = ?1, address = ?2, contact_person = ?3, phone_number = ?4
             WHERE id = ?5",
            params![
                location.name,
                location.address,
                location.contact_person,
                location.phone_number,
                id
            ],
        )
        .map_err(|e| unique_violation(e, || format!("Location '{}' already exists", location.name)))?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("Location {}", id)));
    }
    Ok(location)
}

pub fn delete_location(conn: &Connection, id: i64) -> Result<(), StoreError> {
    delete_by_id(conn, "locations", "Location", id)
}

pub fn location_count(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))?)
}

// ============================================================================
// Projects
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectForm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl ProjectForm {
    fn validated(&self) -> Result<Project, StoreError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(StoreError::invalid("End date cannot be before start date"));
            }
        }
        Ok(Project {
            id: 0,
            name: required_name(&self.name, 100)?,
            description: clean(self.description.clone()),
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
    })
}

pub fn list_projects(conn: &Connection) -> Result<Vec<Project>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, start_date, end_date FROM projects ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], map_project)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_project(conn: &Connection, id: i64) -> Result<Option<Project>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, start_date, end_date FROM projects WHERE id = ?1",
            [id],
            map_project,
        )
        .optional()?)
}

pub fn create_project(conn: &Connection, form: &ProjectForm) -> Result<Project, StoreError> {
    let mut project = form.validated()?;
    conn.execute(
        "INSERT INTO projects (name, description, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
        params![
            project.name,
            project.description,
            project.start_date,
            project.end_date
        ],
    )
    .map_err(|e| unique_violation(e, || format!("Project '{}' already exists", project.name)))?;
    project.id = conn.last_insert_rowid();
    Ok(project)
}

pub fn update_project(
    conn: &Connection,
    id: i64,
    form: &ProjectForm,
) -> Result<Project, StoreError> {
    let mut project = form.validated()?;
    project.id = id;
    let changed = conn
        .execute(
            "UPDATE projects SET name = ?1, description = ?2, start_date = ?3, end_date = ?4
             WHERE id = ?5",
            params![
                project.name,
                project.description,
                project.start_date,
                project.end_date,
                id
            ],
        )
        .map_err(|e| unique_violation(e, || format!("Project '{}' already exists", project.name)))?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("Project {}", id)));
    }
    Ok(project)
}

pub fn delete_project(conn: &Connection, id: i64) -> Result<(), StoreError> {
    delete_by_id(conn, "projects", "Project", id)
}

// ============================================================================
// Document tags
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentTag {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagForm {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn map_tag(row: &Row<'_>) -> rusqlite::Result<DocumentTag> {
    Ok(DocumentTag {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
    })
}

pub fn list_tags(conn: &Connection) -> Result<Vec<DocumentTag>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, name, description FROM document_tags ORDER BY name")?;
    let rows = stmt.query_map([], map_tag)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_tag(conn: &Connection, id: i64) -> Result<Option<DocumentTag>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, name, description FROM document_tags WHERE id = ?1",
            [id],
            map_tag,
        )
        .optional()?)
}

pub fn create_tag(conn: &Connection, form: &TagForm) -> Result<DocumentTag, StoreError> {
    let name = required_name(&form.name, 100)?;
    let description = clean(form.description.clone()).unwrap_or_default();
    conn.execute(
        "INSERT INTO document_tags (name, description) VALUES (?1, ?2)",
        params![name, description],
    )
    .map_err(|e| unique_violation(e, || format!("Tag '{}' already exists", name)))?;
    Ok(DocumentTag {
        id: conn.last_insert_rowid(),
        name,
        description,
    })
}

pub fn update_tag(conn: &Connection, id: i64, form: &TagForm) -> Result<DocumentTag, StoreError> {
    let name = required_name(&form.name, 100)?;
    let description = clean(form.description.clone()).unwrap_or_default();
    let changed = conn
        .execute(
            "UPDATE document_tags SET name = ?1, description = ?2 WHERE id = ?3",
            params![name, description, id],
        )
        .map_err(|e| unique_violation(e, || format!("Tag '{}' already exists", name)))?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("Tag {}", id)));
    }
    Ok(DocumentTag {
        id,
        name,
        description,
    })
}

pub fn delete_tag(conn: &Connection, id: i64) -> Result<(), StoreError> {
    delete_by_id(conn, "document_tags", "Tag", id)
}

/// Tag named `name`, created on first use
pub fn get_or_create_tag(conn: &Connection, name: &str) -> Result<DocumentTag, StoreError> {
    let existing = conn
        .query_row(
            "SELECT id, name, description FROM document_tags WHERE name = ?1",
            [name],
            map_tag,
        )
        .optional()?;
    match existing {
        Some(tag) => Ok(tag),
        None => create_tag(
            conn,
            &TagForm {
                name: name.to_string(),
                description: None,
            },
        ),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn required_name(raw: &str, max_len: usize) -> Result<String, StoreError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::invalid("Name is required"));
    }
    if name.chars().count() > max_len {
        return Err(StoreError::invalid(format!(
            "Name must be at most {} characters",
            max_len
        )));
    }
    Ok(name.to_string())
}

fn delete_by_id(conn: &Connection, table: &str, what: &str, id: i64) -> Result<(), StoreError> {
    let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("{} {}", what, id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[tokio::test]
    async fn category_prefix_is_normalized_and_unique() {
        let db = Database::in_memory().unwrap();
        let (created, dup) = db
            .call(|conn| {
                let created = create_category(
                    conn,
                    &CategoryForm {
                        name: "Laptop".into(),
                        prefix: "lap".into(),
                    },
                )?;
                let dup = create_category(
                    conn,
                    &CategoryForm {
                        name: "Laptops".into(),
                        prefix: "LAP".into(),
                    },
                );
                Ok((created, dup))
            })
            .await
            .unwrap();

        assert_eq!(created.prefix, "LAP");
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn project_dates_are_checked() {
        let db = Database::in_memory().unwrap();
        let result = db
            .call(|conn| {
                create_project(
                    conn,
                    &ProjectForm {
                        name: "Rollout".into(),
                        start_date: NaiveDate::from_ymd_opt(2025, 5, 1),
                        end_date: NaiveDate::from_ymd_opt(2025, 4, 1),
                        ..Default::default()
                    },
                )
            })
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn get_or_create_tag_reuses_existing() {
        let db = Database::in_memory().unwrap();
        let (a, b, all) = db
            .call(|conn| {
                let a = get_or_create_tag(conn, "Invoice")?;
                let b = get_or_create_tag(conn, "Invoice")?;
                Ok((a, b, list_tags(conn)?))
            })
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn deleting_missing_location_is_not_found() {
        let db = Database::in_memory().unwrap();
        let result = db.call(|conn| delete_location(conn, 42)).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn category_lookup_by_name_ignores_case() {
        let db = Database::in_memory().unwrap();
        let found = db
            .call(|conn| {
                create_category(
                    conn,
                    &CategoryForm {
                        name: OTHER_CATEGORY.into(),
                        prefix: "OTH".into(),
                    },
                )?;
                find_category_by_name(conn, "other")
            })
            .await
            .unwrap();
        assert_eq!(found.map(|c| c.prefix), Some("OTH".to_string()));
    }
}
