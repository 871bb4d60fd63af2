//! Protocol handlers, one per client message kind.

pub mod chat;
pub mod friend;
pub mod group;
pub mod login;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use netherlink_auth::TokenVerifier;
use netherlink_core::ids::UserId;
use netherlink_core::models::Decision;
use netherlink_core::protocol::{Envelope, EventKind};
use netherlink_core::RelayError;
use netherlink_store::{SocialStore, StoreError, UserRow};

use crate::registry::ConnectionRegistry;
use crate::session::Session;

/// Shared dependencies handed to every handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn SocialStore>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Handles one client message kind.
///
/// Implementations run every check before their first send, so an error
/// never leaves a partial set of notifications behind.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError>;
}

/// Decode a client payload, reporting shape errors as validation failures.
pub(crate) fn decode<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, RelayError> {
    envelope
        .decode_payload()
        .map_err(|e| RelayError::validation(format!("invalid {} payload: {e}", envelope.kind)))
}

/// Build a server envelope. Encoding failures are internal errors.
pub(crate) fn event<T: Serialize>(kind: EventKind, payload: &T) -> Result<Envelope, RelayError> {
    Envelope::new(kind, payload).map_err(|e| RelayError::Store(format!("encode {}: {e}", kind.as_str())))
}

pub(crate) fn parse_decision(action: &str) -> Result<Decision, RelayError> {
    action.parse().map_err(RelayError::Validation)
}

/// The authenticated user behind `session`.
pub(crate) fn current_user(session: &Session) -> Result<UserId, RelayError> {
    if !session.is_authenticated() {
        return Err(RelayError::LoginRequired);
    }
    session.user_id().ok_or(RelayError::LoginRequired)
}

/// Lift a store failure, logging the detail of internal ones.
pub(crate) fn store_err(op: &'static str) -> impl Fn(StoreError) -> RelayError {
    move |e| {
        if !matches!(e, StoreError::NotFound(_) | StoreError::Conflict(_)) {
            error!(op, error = %e, "store operation failed");
        }
        RelayError::from(e)
    }
}

/// Profile of a user who must exist (the sender or a responder).
pub(crate) fn require_profile(ctx: &HandlerContext, uid: &UserId) -> Result<UserRow, RelayError> {
    ctx.store
        .get_user(uid)
        .map_err(store_err("get_user"))?
        .ok_or_else(|| RelayError::not_found(format!("user {uid} not found")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use netherlink_auth::JwtAuth;
    use netherlink_core::ids::GroupId;
    use netherlink_core::models::GroupRole;
    use netherlink_store::SqliteStore;
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::Outbound;

    pub const SECRET: &str = "test-secret";

    pub struct Harness {
        pub ctx: HandlerContext,
        pub store: Arc<SqliteStore>,
        pub auth: JwtAuth,
    }

    pub struct Client {
        pub session: Arc<Session>,
        pub rx: mpsc::Receiver<Outbound>,
    }

    impl Client {
        /// Next queued frame as JSON, panicking if none.
        pub fn next(&mut self) -> serde_json::Value {
            let frame = self.rx.try_recv().expect("expected a queued frame");
            serde_json::from_str(&frame).unwrap()
        }

        pub fn is_empty(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let auth = JwtAuth::new(SECRET, "netherlink", Duration::from_secs(3600));
            let ctx = HandlerContext {
                registry: Arc::new(ConnectionRegistry::new(32, Duration::from_secs(10))),
                store: store.clone(),
                verifier: Arc::new(auth.clone()),
            };
            Self { ctx, store, auth }
        }

        pub fn user(&self, uid: &str, name: &str) -> UserId {
            let uid = UserId::from_raw(uid);
            self.store
                .create_user(&uid, name, &format!("https://img/{name}.png"))
                .unwrap();
            uid
        }

        pub fn group(&self, name: &str, owner: &UserId) -> GroupId {
            self.store.create_group(name, owner, "").unwrap().id
        }

        pub fn member(&self, group: GroupId, uid: &UserId, role: GroupRole) {
            self.store.add_member(group, uid, role).unwrap();
        }

        /// A connection authenticated as `uid`.
        pub fn online(&self, uid: &UserId) -> Client {
            let (session, rx) = self.ctx.registry.admit();
            self.ctx.registry.authenticate(&session, uid.clone()).unwrap();
            Client { session, rx }
        }

        pub fn pending(&self) -> Client {
            let (session, rx) = self.ctx.registry.admit();
            Client { session, rx }
        }
    }

    pub fn envelope(kind: &str, payload: serde_json::Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            payload,
        }
    }
}
