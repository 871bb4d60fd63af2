//! Per-connection session state: phase, bound user, auth deadline and the
//! outbound frame queue.
//!
//! Phase, user id and the deadline handle sit behind one lock so the deadline
//! task, the read loop and an evicting login all observe the same
//! transitions:
//!
//! ```text
//! Pending ──login ok──▶ Authenticated
//!    │                       │
//!    └─bad login / timeout───┴──evicted / socket closed──▶ Closed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use netherlink_core::ids::{ConnectionId, UserId};
use netherlink_core::protocol::Envelope;
use netherlink_core::RelayError;

use crate::metrics::OUTBOUND_DROPS_TOTAL;

/// Frames queued for the connection's writer task.
pub type Outbound = Arc<String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Authenticated,
    Closed,
}

struct SessionState {
    phase: Phase,
    user_id: Option<UserId>,
    deadline: Option<AbortHandle>,
}

/// One live WebSocket connection.
pub struct Session {
    conn_id: ConnectionId,
    state: Mutex<SessionState>,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    last_seen: Mutex<Instant>,
    dropped_frames: AtomicU64,
    connected_at: Instant,
}

impl Session {
    pub fn new(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let now = Instant::now();
        let session = Arc::new(Self {
            conn_id: ConnectionId::new(),
            state: Mutex::new(SessionState {
                phase: Phase::Pending,
                user_id: None,
                deadline: None,
            }),
            tx,
            closed: CancellationToken::new(),
            last_seen: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            connected_at: now,
        });
        (session, rx)
    }

    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == Phase::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// The bound user, once authenticated. Kept after close for teardown.
    pub fn user_id(&self) -> Option<UserId> {
        self.state.lock().user_id.clone()
    }

    /// Attach the auth deadline task. Aborted at once if the session already
    /// left `Pending`.
    pub fn set_deadline(&self, handle: AbortHandle) {
        let mut state = self.state.lock();
        if state.phase == Phase::Pending {
            state.deadline = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// `Pending → Authenticated`, cancelling the deadline.
    pub fn mark_authenticated(&self, uid: UserId) -> Result<(), RelayError> {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Pending => {
                state.phase = Phase::Authenticated;
                state.user_id = Some(uid);
                if let Some(deadline) = state.deadline.take() {
                    deadline.abort();
                }
                Ok(())
            }
            Phase::Authenticated => Err(RelayError::conflict("already authenticated")),
            Phase::Closed => Err(RelayError::authentication("connection closed")),
        }
    }

    /// Deadline expiry: closes with `notice` only if still `Pending`.
    /// Returns whether it fired.
    pub fn expire_if_pending(&self, notice: &str) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Pending {
            return false;
        }
        // Dropped, not aborted: the caller is the deadline task itself.
        state.deadline = None;
        self.enqueue(&Envelope::error(notice));
        self.close_locked(&mut state);
        true
    }

    /// Queue `notice` as an `error` envelope, then close. No-op when closed.
    pub fn close_with_notice(&self, notice: &str) -> bool {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return false;
        }
        self.enqueue(&Envelope::error(notice));
        self.close_locked(&mut state);
        true
    }

    /// Idempotent. Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return false;
        }
        self.close_locked(&mut state);
        true
    }

    fn close_locked(&self, state: &mut SessionState) {
        state.phase = Phase::Closed;
        if let Some(deadline) = state.deadline.take() {
            deadline.abort();
        }
        self.closed.cancel();
        debug!(conn_id = %self.conn_id, "session closed");
    }

    /// Resolves once the session is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queue an envelope for the writer. Never blocks: a full queue drops
    /// the frame. Returns `false` if the frame was not queued.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        self.enqueue(envelope)
    }

    /// Queue an already-serialized frame (shared across recipients).
    pub fn send_frame(&self, frame: Outbound) -> bool {
        if self.is_closed() {
            return false;
        }
        self.push(frame)
    }

    fn enqueue(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(json) => self.push(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "failed to encode envelope");
                false
            }
        }
    }

    fn push(&self, frame: Outbound) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                counter!(OUTBOUND_DROPS_TOTAL).increment(1);
                warn!(conn_id = %self.conn_id, "outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_json(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        let frame = rx.try_recv().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn starts_pending() {
        let (session, _rx) = Session::new(8);
        assert_eq!(session.phase(), Phase::Pending);
        assert!(session.user_id().is_none());
        assert!(session.conn_id().as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn authenticate_cancels_deadline() {
        let (session, _rx) = Session::new(8);
        let deadline = tokio::spawn(std::future::pending::<()>());
        session.set_deadline(deadline.abort_handle());

        session.mark_authenticated(UserId::from_raw("alice")).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.user_id(), Some(UserId::from_raw("alice")));
        assert!(deadline.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn second_authentication_conflicts() {
        let (session, _rx) = Session::new(8);
        session.mark_authenticated(UserId::from_raw("alice")).unwrap();
        let err = session.mark_authenticated(UserId::from_raw("bob")).unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
        assert_eq!(session.user_id(), Some(UserId::from_raw("alice")));
    }

    #[tokio::test]
    async fn closed_session_cannot_authenticate() {
        let (session, _rx) = Session::new(8);
        session.close();
        let err = session.mark_authenticated(UserId::from_raw("alice")).unwrap_err();
        assert!(err.closes_connection());
    }

    #[tokio::test]
    async fn expiry_only_fires_while_pending() {
        let (session, mut rx) = Session::new(8);
        session.mark_authenticated(UserId::from_raw("alice")).unwrap();
        assert!(!session.expire_if_pending("login timeout"));
        assert!(session.is_authenticated());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn expiry_sends_notice_and_closes() {
        let (session, mut rx) = Session::new(8);
        assert!(session.expire_if_pending("login timeout"));
        assert!(session.is_closed());
        assert!(session.closed_token().is_cancelled());

        let msg = recv_json(&mut rx);
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["payload"]["message"], "login timeout");
    }

    #[tokio::test]
    async fn late_deadline_handle_is_aborted() {
        let (session, _rx) = Session::new(8);
        session.mark_authenticated(UserId::from_raw("alice")).unwrap();
        let deadline = tokio::spawn(std::future::pending::<()>());
        session.set_deadline(deadline.abort_handle());
        assert!(deadline.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, mut rx) = Session::new(8);
        assert!(session.close_with_notice("bye"));
        assert!(!session.close_with_notice("bye again"));
        assert!(!session.close());

        assert_eq!(recv_json(&mut rx)["payload"]["message"], "bye");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_after_close_is_refused() {
        let (session, mut rx) = Session::new(8);
        session.close();
        assert!(!session.send(&Envelope::error("late")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (session, _rx) = Session::new(1);
        assert!(session.send(&Envelope::error("one")));
        assert!(!session.send(&Envelope::error("two")));
        assert_eq!(session.dropped_frames(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_touch() {
        let (session, _rx) = Session::new(1);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(session.idle_for() >= Duration::from_secs(5));
        session.touch();
        assert!(session.idle_for() < Duration::from_secs(1));
    }
}
