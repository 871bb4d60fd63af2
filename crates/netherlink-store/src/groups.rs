use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use netherlink_core::ids::{GroupId, RequestId, UserId};
use netherlink_core::models::{Decision, GroupRole, RequestStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: GroupId,
    pub name: String,
    pub owner_id: UserId,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinRequestRow {
    pub id: RequestId,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub message: String,
    pub status: RequestStatus,
    /// Set once an owner or admin responds.
    pub handler_uid: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Groups, memberships and join requests.
pub struct GroupRepo {
    db: Database,
}

impl GroupRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a group and make `owner` its owner in one transaction.
    #[instrument(skip(self), fields(owner = %owner))]
    pub fn create_group(
        &self,
        name: &str,
        owner: &UserId,
        avatar: &str,
    ) -> Result<GroupRow, StoreError> {
        self.db.with_tx(|conn| {
            let now = row_helpers::now_rfc3339();
            conn.execute(
                "INSERT INTO chat_groups (name, owner_id, avatar, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![name, owner.as_str(), avatar, now],
            )
            .map_err(|e| StoreError::from_insert(e, || format!("user {owner}")))?;
            let id = GroupId(conn.last_insert_rowid());
            insert_member(conn, id, owner, GroupRole::Owner, &now)?;
            select_group(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("group {id}")))
        })
    }

    #[instrument(skip(self), fields(group_id = %id))]
    pub fn find_group(&self, id: GroupId) -> Result<Option<GroupRow>, StoreError> {
        self.db.with_conn(|conn| select_group(conn, id))
    }

    /// Add a member directly. `Conflict` if already a member.
    #[instrument(skip(self), fields(group_id = %group_id, uid = %uid, role = %role))]
    pub fn add_member(
        &self,
        group_id: GroupId,
        uid: &UserId,
        role: GroupRole,
    ) -> Result<MembershipRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now_rfc3339();
            insert_member(conn, group_id, uid, role, &now)?;
            select_membership(conn, group_id, uid)?
                .ok_or_else(|| StoreError::NotFound(format!("membership {group_id}/{uid}")))
        })
    }

    #[instrument(skip(self), fields(group_id = %group_id, uid = %uid))]
    pub fn find_membership(
        &self,
        group_id: GroupId,
        uid: &UserId,
    ) -> Result<Option<MembershipRow>, StoreError> {
        self.db.with_conn(|conn| select_membership(conn, group_id, uid))
    }

    /// Members holding any of `roles`, oldest first.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub fn list_members_by_role(
        &self,
        group_id: GroupId,
        roles: &[GroupRole],
    ) -> Result<Vec<MembershipRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id, user_id, role, joined_at FROM group_members
                 WHERE group_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let mut rows = stmt.query([group_id.get()])?;
            let mut members = Vec::new();
            while let Some(row) = rows.next()? {
                let member = row_to_membership(row)?;
                if roles.contains(&member.role) {
                    members.push(member);
                }
            }
            Ok(members)
        })
    }

    #[instrument(skip(self), fields(uid = %uid, group_id = %group_id))]
    pub fn has_pending_join_request(
        &self,
        uid: &UserId,
        group_id: GroupId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM group_join_requests
                    WHERE user_id = ?1 AND group_id = ?2 AND status = 'pending')",
                rusqlite::params![uid.as_str(), group_id.get()],
                |row| row.get(0),
            )?)
        })
    }

    #[instrument(skip(self, message), fields(uid = %uid, group_id = %group_id))]
    pub fn create_join_request(
        &self,
        uid: &UserId,
        group_id: GroupId,
        message: &str,
    ) -> Result<JoinRequestRow, StoreError> {
        self.db.with_conn(|conn| {
            let now = row_helpers::now_rfc3339();
            conn.execute(
                "INSERT INTO group_join_requests
                    (user_id, group_id, message, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![
                    uid.as_str(),
                    group_id.get(),
                    message,
                    RequestStatus::Pending.as_str(),
                    now
                ],
            )
            .map_err(|e| StoreError::from_insert(e, || format!("join request {uid} -> {group_id}")))?;
            let id = RequestId(conn.last_insert_rowid());
            select_join_request(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("join request {id}")))
        })
    }

    #[instrument(skip(self), fields(request_id = %id))]
    pub fn find_join_request(&self, id: RequestId) -> Result<Option<JoinRequestRow>, StoreError> {
        self.db.with_conn(|conn| select_join_request(conn, id))
    }

    /// Record the handler's decision. Accepting inserts a `member` row in the
    /// same transaction. A request that is no longer pending yields `Conflict`.
    #[instrument(skip(self), fields(request_id = %id, handler = %handler, decision = %decision))]
    pub fn respond_join_request(
        &self,
        id: RequestId,
        handler: &UserId,
        decision: Decision,
    ) -> Result<JoinRequestRow, StoreError> {
        self.db.with_tx(|conn| {
            let now = row_helpers::now_rfc3339();
            let changed = conn.execute(
                "UPDATE group_join_requests SET status = ?1, handler_uid = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                rusqlite::params![decision.status().as_str(), handler.as_str(), now, id.get()],
            )?;

            let request = select_join_request(conn, id)?
                .ok_or_else(|| StoreError::NotFound(format!("join request {id}")))?;
            if changed == 0 {
                return Err(StoreError::Conflict(format!(
                    "join request {id} already {}",
                    request.status
                )));
            }

            if decision == Decision::Accept {
                conn.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        request.group_id.get(),
                        request.user_id.as_str(),
                        GroupRole::Member.as_str(),
                        now
                    ],
                )?;
                debug!(group_id = %request.group_id, uid = %request.user_id, "member added");
            }
            Ok(request)
        })
    }
}

fn insert_member(
    conn: &Connection,
    group_id: GroupId,
    uid: &UserId,
    role: GroupRole,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![group_id.get(), uid.as_str(), role.as_str(), now],
    )
    .map_err(|e| StoreError::from_insert(e, || format!("membership {group_id}/{uid}")))?;
    Ok(())
}

fn select_group(conn: &Connection, id: GroupId) -> Result<Option<GroupRow>, StoreError> {
    let raw = conn
        .query_row(
            "SELECT id, name, owner_id, avatar, created_at FROM chat_groups WHERE id = ?1",
            [id.get()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    raw.map(|(id, name, owner_id, avatar, created_at)| -> Result<GroupRow, StoreError> {
        Ok(GroupRow {
            id: GroupId(id),
            name,
            owner_id: UserId::from_raw(owner_id),
            avatar,
            created_at: row_helpers::parse_time(&created_at, "chat_groups", "created_at")?,
        })
    })
    .transpose()
}

fn select_membership(
    conn: &Connection,
    group_id: GroupId,
    uid: &UserId,
) -> Result<Option<MembershipRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT group_id, user_id, role, joined_at FROM group_members
         WHERE group_id = ?1 AND user_id = ?2",
    )?;
    let mut rows = stmt.query(rusqlite::params![group_id.get(), uid.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_membership(row).map(Some),
        None => Ok(None),
    }
}

fn select_join_request(
    conn: &Connection,
    id: RequestId,
) -> Result<Option<JoinRequestRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, group_id, message, status, handler_uid, created_at, updated_at
         FROM group_join_requests WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.get()])?;
    match rows.next()? {
        Some(row) => row_to_join_request(row).map(Some),
        None => Ok(None),
    }
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> Result<MembershipRow, StoreError> {
    const T: &str = "group_members";
    let role: String = row_helpers::get(row, 2, T, "role")?;
    let joined_at: String = row_helpers::get(row, 3, T, "joined_at")?;
    Ok(MembershipRow {
        group_id: GroupId(row_helpers::get(row, 0, T, "group_id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, T, "user_id")?),
        role: row_helpers::parse_enum(&role, T, "role")?,
        joined_at: row_helpers::parse_time(&joined_at, T, "joined_at")?,
    })
}

fn row_to_join_request(row: &rusqlite::Row<'_>) -> Result<JoinRequestRow, StoreError> {
    const T: &str = "group_join_requests";
    let status: String = row_helpers::get(row, 4, T, "status")?;
    let created_at: String = row_helpers::get(row, 6, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 7, T, "updated_at")?;
    Ok(JoinRequestRow {
        id: RequestId(row_helpers::get(row, 0, T, "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, T, "user_id")?),
        group_id: GroupId(row_helpers::get(row, 2, T, "group_id")?),
        message: row_helpers::get(row, 3, T, "message")?,
        status: row_helpers::parse_enum(&status, T, "status")?,
        handler_uid: row_helpers::get_opt::<String>(row, 5, T, "handler_uid")?
            .map(UserId::from_raw),
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, T, "updated_at")?,
    })
}
