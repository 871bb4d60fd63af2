use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use netherlink_core::ids::{RequestId, UserId};
use netherlink_core::models::{Decision, RequestStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FriendRequestRow {
    pub id: RequestId,
    pub from_uid: UserId,
    pub to_uid: UserId,
    pub message: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Friend edges and the requests that create them.
pub struct FriendRepo {
    db: Database,
}

const REQUEST_COLUMNS: &str =
    "id, from_uid, to_uid, message, status, created_at, updated_at";

impl FriendRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Edges are stored as symmetric pairs, but either direction counts.
    #[instrument(skip(self), fields(a = %a, b = %b))]
    pub fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM friends
                    WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1))",
                [a.as_str(), b.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    #[instrument(skip(self), fields(uid = %uid))]
    pub fn list_friends(&self, uid: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT friend_id FROM friends WHERE user_id = ?1 ORDER BY friend_id")?;
            let rows = stmt
                .query_map([uid.as_str()], |row| row.get::<_, String>(0))?
                .map(|r| r.map(UserId::from_raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub fn has_pending_request(&self, from: &UserId, to: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM friend_requests
                    WHERE from_uid = ?1 AND to_uid = ?2 AND status = 'pending')",
                [from.as_str(), to.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Insert a pending request. A second pending request for the same
    /// direction is a `Conflict`; an unknown user is `NotFound`.
    #[instrument(skip(self, message), fields(from = %from, to = %to))]
    pub fn create_request(
        &self,
        from: &UserId,
        to: &UserId,
        message: &str,
    ) -> Result<FriendRequestRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now_rfc3339();
            conn.execute(
                "INSERT INTO friend_requests (from_uid, to_uid, message, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    from.as_str(),
                    to.as_str(),
                    message,
                    RequestStatus::Pending.as_str(),
                    now
                ],
            )
            .map_err(|e| {
                StoreError::from_insert(e, || format!("friend request {from} -> {to}"))
            })?;
            let id = RequestId(conn.last_insert_rowid());
            select_request(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("friend request {id}")))
        })
    }

    #[instrument(skip(self), fields(request_id = %id))]
    pub fn find_request(&self, id: RequestId) -> Result<Option<FriendRequestRow>, StoreError> {
        self.db.with_conn(|conn| select_request(conn, id))
    }

    /// Move a pending request to its terminal status. Accepting also inserts
    /// both friend edges in the same transaction. A request that is no longer
    /// pending yields `Conflict` and nothing changes.
    #[instrument(skip(self), fields(request_id = %id, decision = %decision))]
    pub fn respond(
        &self,
        id: RequestId,
        decision: Decision,
    ) -> Result<FriendRequestRow, StoreError> {
        self.db.with_tx(|conn| {
            let now = row_helpers::now_rfc3339();
            let changed = conn.execute(
                "UPDATE friend_requests SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                rusqlite::params![decision.status().as_str(), now, id.get()],
            )?;

            let request = select_request(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("friend request {id}")))?;
            if changed == 0 {
                return Err(StoreError::Conflict(format!(
                    "friend request {id} already {}",
                    request.status
                )));
            }

            if decision == Decision::Accept {
                // OR IGNORE: crossed requests may both be accepted.
                for (user, friend) in [
                    (&request.from_uid, &request.to_uid),
                    (&request.to_uid, &request.from_uid),
                ] {
                    conn.execute(
                        "INSERT OR IGNORE INTO friends (user_id, friend_id, created_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![user.as_str(), friend.as_str(), now],
                    )?;
                }
                debug!(from = %request.from_uid, to = %request.to_uid, "friend edges created");
            }
            Ok(request)
        })
    }
}

fn select_request(conn: &Connection, id: RequestId) -> Result<Option<FriendRequestRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = ?1"
    ))?;
    let mut rows = stmt.query([id.get()])?;
    match rows.next()? {
        Some(row) => row_to_request(row).map(Some),
        None => Ok(None),
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> Result<FriendRequestRow, StoreError> {
    const T: &str = "friend_requests";
    let status: String = row_helpers::get(row, 4, T, "status")?;
    let created_at: String = row_helpers::get(row, 5, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 6, T, "updated_at")?;
    Ok(FriendRequestRow {
        id: RequestId(row_helpers::get(row, 0, T, "id")?),
        from_uid: UserId::from_raw(row_helpers::get::<String>(row, 1, T, "from_uid")?),
        to_uid: UserId::from_raw(row_helpers::get::<String>(row, 2, T, "to_uid")?),
        message: row_helpers::get(row, 3, T, "message")?,
        status: row_helpers::parse_enum(&status, T, "status")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, T, "updated_at")?,
    })
}
