//! Connection registry: every admitted connection, plus the authoritative
//! user → session map with eviction of duplicate logins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::info;

use netherlink_core::ids::{ConnectionId, UserId};
use netherlink_core::protocol::Envelope;
use netherlink_core::RelayError;

use crate::metrics::{AUTH_TIMEOUTS_TOTAL, EVICTIONS_TOTAL, USERS_ONLINE};
use crate::session::{Outbound, Session};

pub const LOGIN_TIMEOUT_NOTICE: &str = "login timeout";
pub const EVICTED_NOTICE: &str = "account signed in on another device";

/// Lock order: `users` before any session lock.
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, Arc<Session>>>,
    connections: DashMap<ConnectionId, Arc<Session>>,
    outbound_queue: usize,
    auth_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(outbound_queue: usize, auth_timeout: Duration) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            connections: DashMap::new(),
            outbound_queue,
            auth_timeout,
        }
    }

    /// Create a pending session and start its auth deadline.
    pub fn admit(&self) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (session, rx) = Session::new(self.outbound_queue);

        let weak = Arc::downgrade(&session);
        let timeout = self.auth_timeout;
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = weak.upgrade() {
                if session.expire_if_pending(LOGIN_TIMEOUT_NOTICE) {
                    counter!(AUTH_TIMEOUTS_TOTAL).increment(1);
                    info!(conn_id = %session.conn_id(), "login timeout");
                }
            }
        });
        session.set_deadline(deadline.abort_handle());

        let _ = self
            .connections
            .insert(session.conn_id().clone(), Arc::clone(&session));
        (session, rx)
    }

    /// Install `session` as the sole owner of `uid`. Any previous session for
    /// the same user is notified, closed and replaced under the same write
    /// lock, so concurrent logins resolve to exactly one winner.
    pub fn authenticate(&self, session: &Arc<Session>, uid: UserId) -> Result<(), RelayError> {
        let mut users = self.users.write();
        session.mark_authenticated(uid.clone())?;

        if let Some(previous) = users.insert(uid.clone(), Arc::clone(session)) {
            if !Arc::ptr_eq(&previous, session) {
                previous.close_with_notice(EVICTED_NOTICE);
                counter!(EVICTIONS_TOTAL).increment(1);
                info!(
                    uid = %uid,
                    evicted = %previous.conn_id(),
                    conn_id = %session.conn_id(),
                    "duplicate login, previous session evicted"
                );
            }
        }
        gauge!(USERS_ONLINE).set(users.len() as f64);
        Ok(())
    }

    /// The live session for `uid`, if online.
    pub fn lookup(&self, uid: &UserId) -> Option<Arc<Session>> {
        self.users.read().get(uid).cloned()
    }

    pub fn is_online(&self, uid: &UserId) -> bool {
        self.users.read().contains_key(uid)
    }

    /// Drop the `uid` entry only if it still belongs to `session`.
    pub fn remove(&self, uid: &UserId, session: &Arc<Session>) -> bool {
        let mut users = self.users.write();
        let owned = users
            .get(uid)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if owned {
            let _ = users.remove(uid);
            gauge!(USERS_ONLINE).set(users.len() as f64);
        }
        owned
    }

    /// Connection teardown: forget the connection and its user binding.
    pub fn release(&self, session: &Arc<Session>) {
        let _ = self.connections.remove(session.conn_id());
        if let Some(uid) = session.user_id() {
            let _ = self.remove(&uid, session);
        }
    }

    /// Push to a user's live session. `false` if offline or the frame was
    /// dropped.
    pub fn send_to(&self, uid: &UserId, envelope: &Envelope) -> bool {
        match self.lookup(uid) {
            Some(session) => session.send(envelope),
            None => false,
        }
    }

    /// Push one frame to each listed user that is online. Serializes once.
    /// Returns how many sessions accepted it.
    pub fn send_to_many<'a, I>(&self, uids: I, envelope: &Envelope) -> usize
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let Ok(json) = envelope.to_json() else {
            return 0;
        };
        let frame: Outbound = Arc::new(json);
        let sessions: Vec<Arc<Session>> = {
            let users = self.users.read();
            uids.into_iter().filter_map(|uid| users.get(uid).cloned()).collect()
        };
        sessions
            .iter()
            .filter(|s| s.send_frame(Arc::clone(&frame)))
            .count()
    }

    /// Push to every authenticated session. Returns how many accepted it.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let frame: Outbound = match envelope.to_json() {
            Ok(json) => Arc::new(json),
            Err(_) => return 0,
        };
        let sessions: Vec<Arc<Session>> = self.users.read().values().cloned().collect();
        sessions
            .iter()
            .filter(|s| s.send_frame(Arc::clone(&frame)))
            .count()
    }

    pub fn online_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every admitted connection (shutdown).
    pub fn close_all(&self, notice: &str) -> usize {
        let sessions: Vec<Arc<Session>> =
            self.connections.iter().map(|e| Arc::clone(e.value())).collect();
        sessions
            .iter()
            .filter(|s| s.close_with_notice(notice))
            .count()
    }
}
