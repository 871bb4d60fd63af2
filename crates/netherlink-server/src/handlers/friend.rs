use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use netherlink_core::ids::UserId;
use netherlink_core::models::Decision;
use netherlink_core::protocol::{
    format_notification_time, Ack, Envelope, EventKind, FriendRequestPayload,
    FriendRequestReceived, FriendRequestResult, HandleRequestPayload,
};
use netherlink_core::RelayError;

use super::{current_user, decode, event, parse_decision, require_profile, store_err};
use super::{HandlerContext, MessageHandler};
use crate::session::Session;

/// `friend_request{to_uid, message}`: record a pending request and notify
/// the target if online.
pub struct FriendRequestHandler;

#[async_trait]
impl MessageHandler for FriendRequestHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: FriendRequestPayload = decode(envelope)?;
        let from = current_user(session)?;

        if payload.to_uid.is_empty() {
            return Err(RelayError::validation("missing required field: to_uid"));
        }
        let to = UserId::from_raw(payload.to_uid);
        if to == from {
            return Err(RelayError::validation("cannot send a friend request to yourself"));
        }

        let sender = require_profile(ctx, &from)?;
        let _ = require_profile(ctx, &to)?;
        if ctx.store.are_friends(&from, &to).map_err(store_err("are_friends"))? {
            return Err(RelayError::conflict("already friends"));
        }
        if ctx
            .store
            .has_pending_friend_request(&from, &to)
            .map_err(store_err("has_pending_friend_request"))?
        {
            return Err(RelayError::conflict("friend request already pending"));
        }

        let request = ctx
            .store
            .create_friend_request(&from, &to, &payload.message)
            .map_err(store_err("create_friend_request"))?;

        let ack = event(EventKind::FriendRequestResponse, &Ack::ok("friend request sent"))?;
        let notice = event(
            EventKind::FriendRequestReceived,
            &FriendRequestReceived {
                request_id: request.id,
                from_uid: from.clone(),
                from_name: sender.name,
                from_avatar: sender.avatar_url,
                message: request.message,
                created_at: format_notification_time(request.created_at),
            },
        )?;

        let _ = session.send(&ack);
        let delivered = ctx.registry.send_to(&to, &notice);
        info!(request_id = %request.id, from = %from, to = %to, delivered, "friend request created");
        Ok(())
    }
}

/// `friend_request_handle{request_id, action}`: the target accepts or
/// rejects; the requester is told the outcome if online.
pub struct FriendRequestHandleHandler;

#[async_trait]
impl MessageHandler for FriendRequestHandleHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: HandleRequestPayload = decode(envelope)?;
        let responder = current_user(session)?;
        let decision = parse_decision(&payload.action)?;

        let request = ctx
            .store
            .get_friend_request(payload.request_id)
            .map_err(store_err("get_friend_request"))?
            .ok_or_else(|| {
                RelayError::not_found(format!("friend request {} not found", payload.request_id))
            })?;
        if request.to_uid != responder {
            return Err(RelayError::authorization(
                "only the recipient can handle this friend request",
            ));
        }
        if request.status.is_terminal() {
            return Err(RelayError::conflict(format!(
                "friend request already {}",
                request.status
            )));
        }
        let profile = require_profile(ctx, &responder)?;

        // Atomic: a concurrent response loses with Conflict here.
        let updated = ctx
            .store
            .respond_friend_request(request.id, decision)
            .map_err(store_err("respond_friend_request"))?;

        let text = result_message(decision);
        let ack = event(EventKind::FriendRequestHandleResponse, &Ack::ok(text))?;
        let result = event(
            EventKind::FriendRequestResult,
            &FriendRequestResult {
                request_id: updated.id,
                from_uid: responder.clone(),
                from_name: profile.name,
                action: decision,
                message: text.to_owned(),
            },
        )?;

        let _ = session.send(&ack);
        let delivered = ctx.registry.send_to(&updated.from_uid, &result);
        info!(
            request_id = %updated.id,
            requester = %updated.from_uid,
            responder = %responder,
            status = %updated.status,
            delivered,
            "friend request handled"
        );
        Ok(())
    }
}

fn result_message(decision: Decision) -> &'static str {
    match decision {
        Decision::Accept => "friend request accepted",
        Decision::Reject => "friend request rejected",
    }
}
