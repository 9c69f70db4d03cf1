//! Transport layer for character channels
//!
//! This module provides the channel abstraction the engine sends through, the
//! per-session detachable wrapper that serializes sends, and the concrete
//! in-memory and WebSocket transports.

pub mod channel;
pub mod memory;
pub mod websocket;

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::envelope::Envelope;

/// Outbound half of a duplex character channel
///
/// Implementations must be safe to call from several routines; ordering
/// between concurrent callers is provided by [`channel::SessionChannel`].
pub trait Channel: Send + Sync {
    /// Send one envelope to the peer
    ///
    /// # Errors
    /// Returns `SessionError::ChannelClosed` if the peer is gone
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<()>>;

    /// Close the channel
    ///
    /// # Errors
    /// Returns error if closing fails
    fn close(&self) -> BoxFuture<'_, Result<()>>;

    /// Whether the channel still accepts sends
    fn is_open(&self) -> bool;
}

/// A freshly accepted duplex connection
///
/// `inbound` yields envelopes in arrival order. A `Protocol` error item is a
/// malformed frame and the stream continues; any other error ends the stream.
pub struct Connection {
    /// Outbound half
    pub channel: Arc<dyn Channel>,
    /// Inbound half
    pub inbound: mpsc::UnboundedReceiver<Result<Envelope>>,
}

pub use channel::{ChannelFault, SessionChannel};
pub use memory::{MemoryChannel, MemoryPeer};
