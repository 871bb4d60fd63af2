//! The store interface the relay handlers consume, and its SQLite
//! implementation.

use std::path::Path;

use netherlink_core::ids::{GroupId, RequestId, UserId};
use netherlink_core::models::{Decision, GroupRole};

use crate::database::Database;
use crate::error::StoreError;
use crate::friends::{FriendRepo, FriendRequestRow};
use crate::groups::{GroupRepo, GroupRow, JoinRequestRow, MembershipRow};
use crate::users::{UserRepo, UserRow};

/// Users, friendships, groups and the two request workflows.
///
/// Calls are short and synchronous; implementations serialize access
/// internally and must make each `respond_*` call atomic.
pub trait SocialStore: Send + Sync {
    fn get_user(&self, uid: &UserId) -> Result<Option<UserRow>, StoreError>;
    fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError>;
    fn has_pending_friend_request(&self, from: &UserId, to: &UserId) -> Result<bool, StoreError>;
    fn create_friend_request(
        &self,
        from: &UserId,
        to: &UserId,
        message: &str,
    ) -> Result<FriendRequestRow, StoreError>;
    fn get_friend_request(&self, id: RequestId) -> Result<Option<FriendRequestRow>, StoreError>;
    /// Status update plus, on accept, the symmetric edge pair.
    fn respond_friend_request(
        &self,
        id: RequestId,
        decision: Decision,
    ) -> Result<FriendRequestRow, StoreError>;

    fn get_group(&self, id: GroupId) -> Result<Option<GroupRow>, StoreError>;
    /// The user's role in the group, `None` if not a member.
    fn get_membership(&self, group_id: GroupId, uid: &UserId)
        -> Result<Option<GroupRole>, StoreError>;
    fn has_pending_join_request(&self, uid: &UserId, group_id: GroupId)
        -> Result<bool, StoreError>;
    fn create_join_request(
        &self,
        uid: &UserId,
        group_id: GroupId,
        message: &str,
    ) -> Result<JoinRequestRow, StoreError>;
    fn get_join_request(&self, id: RequestId) -> Result<Option<JoinRequestRow>, StoreError>;
    /// Status and handler update plus, on accept, the `member` row.
    fn respond_join_request(
        &self,
        id: RequestId,
        handler: &UserId,
        decision: Decision,
    ) -> Result<JoinRequestRow, StoreError>;
    fn list_members_by_role(
        &self,
        group_id: GroupId,
        roles: &[GroupRole],
    ) -> Result<Vec<MembershipRow>, StoreError>;
}

/// [`SocialStore`] over a single SQLite database.
pub struct SqliteStore {
    users: UserRepo,
    friends: FriendRepo,
    groups: GroupRepo,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            friends: FriendRepo::new(db.clone()),
            groups: GroupRepo::new(db),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn create_user(&self, uid: &UserId, name: &str, avatar_url: &str) -> Result<UserRow, StoreError> {
        self.users.create(uid, name, avatar_url)
    }

    pub fn create_group(&self, name: &str, owner: &UserId, avatar: &str) -> Result<GroupRow, StoreError> {
        self.groups.create_group(name, owner, avatar)
    }

    pub fn add_member(
        &self,
        group_id: GroupId,
        uid: &UserId,
        role: GroupRole,
    ) -> Result<MembershipRow, StoreError> {
        self.groups.add_member(group_id, uid, role)
    }

    pub fn list_friends(&self, uid: &UserId) -> Result<Vec<UserId>, StoreError> {
        self.friends.list_friends(uid)
    }
}

impl SocialStore for SqliteStore {
    fn get_user(&self, uid: &UserId) -> Result<Option<UserRow>, StoreError> {
        self.users.find(uid)
    }

    fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        self.friends.are_friends(a, b)
    }

    fn has_pending_friend_request(&self, from: &UserId, to: &UserId) -> Result<bool, StoreError> {
        self.friends.has_pending_request(from, to)
    }

    fn create_friend_request(
        &self,
        from: &UserId,
        to: &UserId,
        message: &str,
    ) -> Result<FriendRequestRow, StoreError> {
        self.friends.create_request(from, to, message)
    }

    fn get_friend_request(&self, id: RequestId) -> Result<Option<FriendRequestRow>, StoreError> {
        self.friends.find_request(id)
    }

    fn respond_friend_request(
        &self,
        id: RequestId,
        decision: Decision,
    ) -> Result<FriendRequestRow, StoreError> {
        self.friends.respond(id, decision)
    }

    fn get_group(&self, id: GroupId) -> Result<Option<GroupRow>, StoreError> {
        self.groups.find_group(id)
    }

    fn get_membership(
        &self,
        group_id: GroupId,
        uid: &UserId,
    ) -> Result<Option<GroupRole>, StoreError> {
        Ok(self.groups.find_membership(group_id, uid)?.map(|m| m.role))
    }

    fn has_pending_join_request(
        &self,
        uid: &UserId,
        group_id: GroupId,
    ) -> Result<bool, StoreError> {
        self.groups.has_pending_join_request(uid, group_id)
    }

    fn create_join_request(
        &self,
        uid: &UserId,
        group_id: GroupId,
        message: &str,
    ) -> Result<JoinRequestRow, StoreError> {
        self.groups.create_join_request(uid, group_id, message)
    }

    fn get_join_request(&self, id: RequestId) -> Result<Option<JoinRequestRow>, StoreError> {
        self.groups.find_join_request(id)
    }

    fn respond_join_request(
        &self,
        id: RequestId,
        handler: &UserId,
        decision: Decision,
    ) -> Result<JoinRequestRow, StoreError> {
        self.groups.respond_join_request(id, handler, decision)
    }

    fn list_members_by_role(
        &self,
        group_id: GroupId,
        roles: &[GroupRole],
    ) -> Result<Vec<MembershipRow>, StoreError> {
        self.groups.list_members_by_role(group_id, roles)
    }
}
