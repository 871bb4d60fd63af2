use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use netherlink_core::ids::{GroupId, UserId};
use netherlink_core::models::{Decision, GroupRole};
use netherlink_core::protocol::{
    format_notification_time, Ack, Envelope, EventKind, GroupJoinRequestPayload,
    GroupJoinRequestReceived, GroupJoinRequestResult, HandleRequestPayload,
};
use netherlink_core::RelayError;

use super::{current_user, decode, event, parse_decision, require_profile, store_err};
use super::{HandlerContext, MessageHandler};
use crate::session::Session;

const MODERATORS: [GroupRole; 2] = [GroupRole::Owner, GroupRole::Admin];

/// `group_join_request{group_id, message}`: record a pending request and
/// notify every online owner and admin of the group.
pub struct GroupJoinRequestHandler;

#[async_trait]
impl MessageHandler for GroupJoinRequestHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: GroupJoinRequestPayload = decode(envelope)?;
        let requester = current_user(session)?;
        let group_id = payload
            .group_id
            .ok_or_else(|| RelayError::validation("missing required field: group_id"))?;

        let group = ctx
            .store
            .get_group(group_id)
            .map_err(store_err("get_group"))?
            .ok_or_else(|| RelayError::not_found(format!("group {group_id} not found")))?;
        if ctx
            .store
            .get_membership(group_id, &requester)
            .map_err(store_err("get_membership"))?
            .is_some()
        {
            return Err(RelayError::conflict("already a member of this group"));
        }
        if ctx
            .store
            .has_pending_join_request(&requester, group_id)
            .map_err(store_err("has_pending_join_request"))?
        {
            return Err(RelayError::conflict("join request already pending"));
        }
        let profile = require_profile(ctx, &requester)?;
        let moderators = moderator_ids(ctx, group_id)?;

        let request = ctx
            .store
            .create_join_request(&requester, group_id, &payload.message)
            .map_err(store_err("create_join_request"))?;

        let ack = event(EventKind::GroupJoinRequestResponse, &Ack::ok("group join request sent"))?;
        let notice = event(
            EventKind::GroupJoinRequestReceived,
            &GroupJoinRequestReceived {
                request_id: request.id,
                group_id,
                group_name: group.name,
                from_uid: requester.clone(),
                from_name: profile.name,
                from_avatar: profile.avatar_url,
                message: request.message,
                created_at: format_notification_time(request.created_at),
            },
        )?;

        let _ = session.send(&ack);
        let delivered = ctx.registry.send_to_many(&moderators, &notice);
        info!(
            request_id = %request.id,
            group_id = %group_id,
            requester = %requester,
            delivered,
            "group join request created"
        );
        Ok(())
    }
}

/// `group_join_request_handle{request_id, action}`: an owner or admin
/// decides; the requester and the other moderators hear the outcome.
pub struct GroupJoinRequestHandleHandler;

#[async_trait]
impl MessageHandler for GroupJoinRequestHandleHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: HandleRequestPayload = decode(envelope)?;
        let handler = current_user(session)?;
        let decision = parse_decision(&payload.action)?;

        let request = ctx
            .store
            .get_join_request(payload.request_id)
            .map_err(store_err("get_join_request"))?
            .ok_or_else(|| {
                RelayError::not_found(format!("join request {} not found", payload.request_id))
            })?;
        let group = ctx
            .store
            .get_group(request.group_id)
            .map_err(store_err("get_group"))?
            .ok_or_else(|| RelayError::not_found(format!("group {} not found", request.group_id)))?;
        let role = ctx
            .store
            .get_membership(group.id, &handler)
            .map_err(store_err("get_membership"))?
            .filter(|role| role.can_moderate())
            .ok_or_else(|| {
                RelayError::authorization("only group owners and admins can handle join requests")
            })?;
        if request.status.is_terminal() {
            return Err(RelayError::conflict(format!(
                "join request already {}",
                request.status
            )));
        }
        let profile = require_profile(ctx, &handler)?;
        // An owner's decision reaches the admins; an admin's reaches the owner
        // and the other admins. Either way: every moderator but the handler.
        let others: Vec<UserId> = moderator_ids(ctx, group.id)?
            .into_iter()
            .filter(|uid| *uid != handler && *uid != request.user_id)
            .collect();

        let updated = ctx
            .store
            .respond_join_request(request.id, &handler, decision)
            .map_err(store_err("respond_join_request"))?;

        let text = result_message(decision);
        let ack = event(EventKind::GroupJoinRequestHandleResponse, &Ack::ok(text))?;
        let result = event(
            EventKind::GroupJoinRequestResult,
            &GroupJoinRequestResult {
                request_id: updated.id,
                group_id: group.id,
                group_name: group.name,
                handler_uid: handler.clone(),
                handler_name: profile.name,
                handler_role: role,
                action: decision,
                message: text.to_owned(),
            },
        )?;

        let _ = session.send(&ack);
        let requester_notified = ctx.registry.send_to(&updated.user_id, &result);
        let moderators_notified = ctx.registry.send_to_many(&others, &result);
        info!(
            request_id = %updated.id,
            group_id = %group.id,
            handler = %handler,
            role = %role,
            status = %updated.status,
            requester_notified,
            moderators_notified,
            "group join request handled"
        );
        Ok(())
    }
}

fn moderator_ids(ctx: &HandlerContext, group_id: GroupId) -> Result<Vec<UserId>, RelayError> {
    let members = ctx
        .store
        .list_members_by_role(group_id, &MODERATORS)
        .map_err(store_err("list_members_by_role"))?;
    Ok(members.into_iter().map(|m| m.user_id).collect())
}

fn result_message(decision: Decision) -> &'static str {
    match decision {
        Decision::Accept => "join request accepted",
        Decision::Reject => "join request rejected",
    }
}
