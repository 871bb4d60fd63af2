use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use netherlink_core::protocol::{Envelope, EventKind, LoginPayload, LoginSuccess};
use netherlink_core::RelayError;

use super::{decode, event, HandlerContext, MessageHandler};
use crate::session::Session;

/// `login{uid, token}`: verify the credential and bind the session to the
/// user, evicting any older session for the same user.
pub struct LoginHandler;

#[async_trait]
impl MessageHandler for LoginHandler {
    async fn handle(
        &self,
        session: &Arc<Session>,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<(), RelayError> {
        let payload: LoginPayload = decode(envelope)?;
        if session.is_authenticated() {
            return Err(RelayError::conflict("already authenticated"));
        }

        let uid = ctx
            .verifier
            .verify(&payload.uid, &payload.token)
            .map_err(|e| {
                warn!(conn_id = %session.conn_id(), claimed = %payload.uid, error = %e, "login rejected");
                RelayError::authentication("authentication failed")
            })?;

        let reply = event(EventKind::LoginSuccess, &LoginSuccess { uid: uid.clone() })?;
        ctx.registry.authenticate(session, uid.clone())?;
        let _ = session.send(&reply);

        info!(conn_id = %session.conn_id(), uid = %uid, "login succeeded");
        Ok(())
    }
}
