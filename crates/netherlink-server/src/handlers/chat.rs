use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tracing::debug;

use netherlink_core::ids::{MessageId, UserId};
use netherlink_core::protocol::{conversation_id, ChatMessage, ChatPayload, Envelope, EventKind};
use netherlink_core::RelayError;

use super::{current_user, decode, event, HandlerContext, MessageHandler};
use crate::metrics::CHAT_DELIVERED_TOTAL;
use crate::session::Session;

const TEXT: &str = "text";

/// `chat{to, content, type, extra, is_group}`: acknowledge the sender and
/// forward to the recipient if online. Nothing is stored; an offline
/// recipient never sees the message.
pub struct ChatHandler;

#[async_trait]
impl MessageHandler for ChatHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: ChatPayload = decode(envelope)?;
        let from = current_user(session)?;

        if payload.to.is_empty() || payload.content.is_empty() {
            return Err(RelayError::validation("missing required field: to, content"));
        }
        if payload.is_group {
            return Err(RelayError::validation("group chat is not supported"));
        }
        if payload.content_type != TEXT {
            return Err(RelayError::validation(format!(
                "unsupported message type: {}",
                payload.content_type
            )));
        }

        let to = UserId::from_raw(payload.to);
        let message = ChatMessage {
            success: true,
            message: "sent".into(),
            message_id: MessageId::new(),
            conversation: conversation_id(&from, &to),
            from,
            to,
            content: payload.content,
            content_type: payload.content_type,
            extra: payload.extra,
            timestamp: Utc::now(),
            is_group: false,
        };
        let ack = event(EventKind::ChatResponse, &message)?;
        let forward = event(EventKind::Chat, &message)?;

        let _ = session.send(&ack);
        let delivered = ctx.registry.send_to(&message.to, &forward);
        if delivered {
            counter!(CHAT_DELIVERED_TOTAL).increment(1);
        }
        debug!(
            from = %message.from,
            to = %message.to,
            message_id = %message.message_id,
            delivered,
            "chat relayed"
        );
        Ok(())
    }
}
