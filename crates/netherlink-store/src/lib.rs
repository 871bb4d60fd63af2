//! SQLite persistence for users, friendships, groups and the request
//! workflows the relay drives.

pub mod database;
pub mod error;
pub mod friends;
pub mod groups;
pub mod row_helpers;
pub mod schema;
pub mod social;
pub mod users;

pub use database::Database;
pub use error::StoreError;
pub use friends::{FriendRepo, FriendRequestRow};
pub use groups::{GroupRepo, GroupRow, JoinRequestRow, MembershipRow};
pub use social::{SocialStore, SqliteStore};
pub use users::{UserRepo, UserRow};
