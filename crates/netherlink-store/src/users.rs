use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use netherlink_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub uid: UserId,
    pub name: String,
    pub avatar_url: String,
    pub created_at: DateTime<Utc>,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a user. Fails with `Conflict` if the uid is taken.
    #[instrument(skip(self), fields(uid = %uid))]
    pub fn create(&self, uid: &UserId, name: &str, avatar_url: &str) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now_rfc3339();
            conn.execute(
                "INSERT INTO users (uid, name, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![uid.as_str(), name, avatar_url, now],
            )
            .map_err(|e| StoreError::from_insert(e, || format!("user {uid} already exists")))?;

            Ok(UserRow {
                uid: uid.clone(),
                name: name.to_string(),
                avatar_url: avatar_url.to_string(),
                created_at: row_helpers::parse_time(&now, "users", "created_at")?,
            })
        })
    }

    #[instrument(skip(self), fields(uid = %uid))]
    pub fn find(&self, uid: &UserId) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT uid, name, avatar_url, created_at FROM users WHERE uid = ?1")?;
            let mut rows = stmt.query([uid.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Get a user by uid, `NotFound` if absent.
    pub fn get(&self, uid: &UserId) -> Result<UserRow, StoreError> {
        self.find(uid)?
            .ok_or_else(|| StoreError::NotFound(format!("user {uid}")))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    let created_at: String = row_helpers::get(row, 3, "users", "created_at")?;
    Ok(UserRow {
        uid: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "uid")?),
        name: row_helpers::get(row, 1, "users", "name")?,
        avatar_url: row_helpers::get(row, 2, "users", "avatar_url")?,
        created_at: row_helpers::parse_time(&created_at, "users", "created_at")?,
    })
}
