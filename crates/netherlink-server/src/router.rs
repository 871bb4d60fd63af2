//! Inbound frame routing: parse, gate on authentication, dispatch to the
//! handler for the message kind, and report failures to the sender.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use netherlink_core::protocol::{Envelope, MessageKind};
use netherlink_core::RelayError;

use crate::handlers::chat::ChatHandler;
use crate::handlers::friend::{FriendRequestHandleHandler, FriendRequestHandler};
use crate::handlers::group::{GroupJoinRequestHandleHandler, GroupJoinRequestHandler};
use crate::handlers::login::LoginHandler;
use crate::handlers::{HandlerContext, MessageHandler};
use crate::metrics::{ERRORS_TOTAL, HANDLER_DURATION_SECONDS, MESSAGES_TOTAL};
use crate::session::Session;

pub fn handler_for(kind: MessageKind) -> &'static dyn MessageHandler {
    match kind {
        MessageKind::Login => &LoginHandler,
        MessageKind::Chat => &ChatHandler,
        MessageKind::FriendRequest => &FriendRequestHandler,
        MessageKind::FriendRequestHandle => &FriendRequestHandleHandler,
        MessageKind::GroupJoinRequest => &GroupJoinRequestHandler,
        MessageKind::GroupJoinRequestHandle => &GroupJoinRequestHandleHandler,
    }
}

/// Process one text frame from `session`.
///
/// Every failure becomes exactly one `error` envelope to the sender; an
/// authentication failure also closes the session. Frames arriving after
/// close are ignored.
pub async fn route(ctx: &HandlerContext, session: &Arc<Session>, raw: &str) {
    if session.is_closed() {
        return;
    }

    let (label, result) = match classify(session, raw) {
        Ok((kind, envelope)) => {
            let start = Instant::now();
            let result = handler_for(kind).handle(session, &envelope, ctx).await;
            histogram!(HANDLER_DURATION_SECONDS, "kind" => kind.as_str())
                .record(start.elapsed().as_secs_f64());
            (kind.as_str(), result)
        }
        Err((label, e)) => (label, Err(e)),
    };
    counter!(MESSAGES_TOTAL, "kind" => label).increment(1);

    if let Err(e) = result {
        report(session, label, &e);
    }
}

/// Authentication gate first, then kind lookup: an unauthenticated peer
/// learns nothing about which kinds exist.
fn classify(
    session: &Session,
    raw: &str,
) -> Result<(MessageKind, Envelope), (&'static str, RelayError)> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|_| ("invalid", RelayError::validation("invalid message format")))?;

    if !session.is_authenticated() && envelope.kind != MessageKind::Login.as_str() {
        return Err(("unauthenticated", RelayError::LoginRequired));
    }
    let kind: MessageKind = envelope
        .kind
        .parse()
        .map_err(|e: String| ("unknown", RelayError::Validation(e)))?;
    Ok((kind, envelope))
}

fn report(session: &Session, label: &'static str, error: &RelayError) {
    counter!(ERRORS_TOTAL, "kind" => label, "error_type" => error.error_kind()).increment(1);
    match error {
        RelayError::Store(detail) => {
            warn!(conn_id = %session.conn_id(), kind = label, detail = %detail, "handler failed")
        }
        _ => debug!(
            conn_id = %session.conn_id(),
            kind = label,
            error_type = error.error_kind(),
            error = %error,
            "request rejected"
        ),
    }

    let _ = session.send(&Envelope::error(error.to_string()));
    if error.closes_connection() {
        let _ = session.close();
    }
}
