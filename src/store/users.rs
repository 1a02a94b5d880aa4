//! User accounts

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::db::{clean, unique_violation, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

/// Account to create; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub is_superuser: bool,
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_superuser: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn create(conn: &Connection, user: &NewUser) -> Result<User, StoreError> {
    let username = user.username.trim().to_string();
    if username.is_empty() || username.chars().count() > 150 {
        return Err(StoreError::invalid("Username must be 1 to 150 characters"));
    }
    let email = clean(user.email.clone());
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(StoreError::invalid("Enter a valid email address"));
    }
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO users (username, email, password_hash, is_superuser, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![username, email, user.password_hash, user.is_superuser, created_at],
    )
    .map_err(|e| unique_violation(e, || "A user with that username or email already exists".into()))?;
    Ok(User {
        id: conn.last_insert_rowid(),
        username,
        email,
        is_superuser: user.is_superuser,
        created_at,
    })
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<User>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, username, email, is_superuser, created_at FROM users WHERE id = ?1",
            [id],
            map_user,
        )
        .optional()?)
}

/// User and stored password hash for a login attempt
pub fn find_credentials(
    conn: &Connection,
    username: &str,
) -> Result<Option<(User, String)>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, username, email, is_superuser, created_at, password_hash
             FROM users WHERE username = ?1",
            [username.trim()],
            |row| Ok((map_user(row)?, row.get(5)?)),
        )
        .optional()?)
}

pub fn list(conn: &Connection) -> Result<Vec<User>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, username, email, is_superuser, created_at FROM users ORDER BY username",
    )?;
    let users = stmt.query_map([], map_user)?.collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn username_exists(conn: &Connection, username: &str) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE username = ?1",
            [username.trim()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn new_user(name: &str, email: Option<&str>) -> NewUser {
        NewUser {
            username: name.into(),
            email: email.map(str::to_string),
            password_hash: "hash".into(),
            is_superuser: false,
        }
    }

    #[tokio::test]
    async fn usernames_and_emails_are_unique() {
        let db = Database::in_memory().unwrap();
        let (dup_name, dup_email, creds) = db
            .call(|conn| {
                create(conn, &new_user("alice", Some("a@example.com")))?;
                let dup_name = create(conn, &new_user("alice", None));
                let dup_email = create(conn, &new_user("bob", Some("a@example.com")));
                Ok((dup_name, dup_email, find_credentials(conn, "alice")?))
            })
            .await
            .unwrap();
        assert!(matches!(dup_name, Err(StoreError::Conflict(_))));
        assert!(matches!(dup_email, Err(StoreError::Conflict(_))));
        assert_eq!(creds.map(|(_, hash)| hash), Some("hash".to_string()));
    }

    #[tokio::test]
    async fn blank_emails_do_not_collide() {
        let db = Database::in_memory().unwrap();
        let users = db
            .call(|conn| {
                create(conn, &new_user("a", Some(" ")))?;
                create(conn, &new_user("b", None))?;
                list(conn)
            })
            .await
            .unwrap();
        assert_eq!(users.len(), 2);
    }
}
