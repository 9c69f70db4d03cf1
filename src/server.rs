//! Connection handler: activation handshake and inbound message loop
//!
//! Transport-agnostic; the WebSocket listener and the tests both hand it a
//! [`Connection`].

use std::sync::Arc;

use crate::error::SessionError;
use crate::manager::{Activation, SessionManager};
use crate::transport::{Channel, Connection};
use crate::types::envelope::{Envelope, names};
use crate::types::identifiers::CharacterId;

type Inbound = tokio::sync::mpsc::UnboundedReceiver<crate::Result<Envelope>>;

/// Serve one connection until its inbound stream ends
///
/// The first message must be a `connectionInit` carrying a `characterId`.
/// Exactly one `{result, msg}` acknowledgement is sent before the message
/// loop starts; a rejected handshake closes the channel. When the stream
/// ends the session is demoted to hosted, unless a newer connection has
/// taken it over in the meantime.
pub async fn serve_connection(manager: SessionManager, connection: Connection) {
    let Connection {
        channel,
        mut inbound,
    } = connection;

    let Some(activation) = handshake(&manager, &channel, &mut inbound).await else {
        if let Err(e) = channel.close().await {
            log::debug!("Closing rejected connection failed: {e}");
        }
        return;
    };

    let id = activation.session.id();
    let generation = activation.generation;
    message_loop(&manager, id, generation, &mut inbound).await;

    if manager.disconnect(id, generation) {
        log::info!("[char {id}] Connection ended, session hosted");
    }
}

async fn handshake(
    manager: &SessionManager,
    channel: &Arc<dyn Channel>,
    inbound: &mut Inbound,
) -> Option<Activation> {
    let first = match inbound.recv().await? {
        Ok(envelope) => envelope,
        Err(e @ SessionError::Protocol(_)) => {
            log::warn!("Rejecting connection, malformed first message: {e}");
            reject(channel, None, "malformed connectionInit").await;
            return None;
        }
        Err(e) => {
            log::debug!("Connection ended before handshake: {e}");
            return None;
        }
    };

    let Some(id) = first.character_id else {
        log::warn!("Rejecting connection without characterId");
        reject(channel, None, "characterId is required").await;
        return None;
    };
    if first.message_name != names::CONNECTION_INIT {
        log::warn!(
            "[char {id}] Rejecting connection, first message was '{}'",
            first.message_name
        );
        reject(channel, Some(id), "expected connectionInit").await;
        return None;
    }

    let activation = match manager.activate(id, Arc::clone(channel)) {
        Ok(activation) => activation,
        Err(e) => {
            reject(channel, Some(id), &e.to_string()).await;
            return None;
        }
    };

    let msg = if activation.is_resumed() {
        "session resumed"
    } else {
        "session created"
    };
    if let Err(e) = channel.send(Envelope::ack(Some(id), true, msg)).await {
        log::warn!("[char {id}] Handshake acknowledgement failed: {e}");
        manager.abort_activation(&activation);
        return None;
    }
    Some(activation)
}

async fn reject(channel: &Arc<dyn Channel>, id: Option<CharacterId>, msg: &str) {
    if let Err(e) = channel.send(Envelope::ack(id, false, msg)).await {
        log::debug!("Rejection could not be delivered: {e}");
    }
}

/// Route inbound frames while this connection still owns the session
async fn message_loop(
    manager: &SessionManager,
    id: CharacterId,
    generation: u64,
    inbound: &mut Inbound,
) {
    while let Some(item) = inbound.recv().await {
        if !manager.is_current(id, generation) {
            log::info!("[char {id}] Connection generation {generation} was superseded, closing");
            break;
        }

        let envelope = match item {
            Ok(envelope) => envelope,
            Err(e @ SessionError::Protocol(_)) => {
                log::warn!("[char {id}] Dropped inbound frame: {e}");
                continue;
            }
            Err(e) => {
                log::info!("[char {id}] Inbound stream failed: {e}");
                break;
            }
        };

        if let Some(other) = envelope.character_id
            && other != id
        {
            log::warn!("[char {id}] Dropped '{}' addressed to {other}", envelope.message_name);
            continue;
        }

        match manager.route_message(id, &envelope).await {
            Ok(()) => {}
            Err(e @ (SessionError::Protocol(_) | SessionError::SessionTerminated(_))) => {
                log::warn!("[char {id}] Dropped '{}': {e}", envelope.message_name);
            }
            Err(SessionError::SessionNotFound(_)) => {
                log::info!("[char {id}] Session no longer active, closing connection");
                break;
            }
            Err(e) if e.is_channel_error() => {
                log::info!("[char {id}] Outbound channel failed: {e}");
                break;
            }
            Err(e) => {
                log::warn!("[char {id}] Failed to handle '{}': {e}", envelope.message_name);
            }
        }
    }
}
