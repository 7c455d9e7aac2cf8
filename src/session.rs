//! Delivery-surface session logic (§4.5), transport-agnostic: given an
//! inbound `ClientMessage` and a `Router`, produce the reply frame. The
//! actual socket plumbing (axum WS upgrade, read/write loop) lives in the
//! gateway service binary; this module is what it calls into.

use std::sync::Arc;

use gateway_protocol::{ClientMessage, ServerMessage};

use crate::error::SessionError;
use crate::router::Router;

/// Handles one inbound frame for `client_id` against `router`, returning the
/// frame to send back. `PING` bypasses throttling entirely, matching §4.5.
pub async fn handle_message(router: &Arc<Router>, client_id: &str, message: ClientMessage) -> ServerMessage {
    match dispatch(router, client_id, message).await {
        Ok(reply) => reply,
        Err(err) => ServerMessage::Err {
            code: err.wire_code().to_owned(),
            message: err.to_string(),
        },
    }
}

async fn dispatch(router: &Arc<Router>, client_id: &str, message: ClientMessage) -> Result<ServerMessage, SessionError> {
    match message {
        ClientMessage::Sub { filter, include_status } => {
            let subscription_id = router
                .subscribe(client_id, filter, include_status)
                .await
                .map_err(SessionError::Router)?;
            Ok(ServerMessage::Ack {
                correlation: None,
                subscription_id: Some(subscription_id),
            })
        }
        ClientMessage::Unsub { subscription_id } => {
            router
                .unsubscribe(client_id, &subscription_id)
                .await
                .map_err(SessionError::Router)?;
            Ok(ServerMessage::Ack {
                correlation: None,
                subscription_id: Some(subscription_id),
            })
        }
        ClientMessage::Ping => Ok(ServerMessage::Pong),
    }
}
