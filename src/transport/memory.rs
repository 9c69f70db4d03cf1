//! In-process channel pair
//!
//! Used by tests and embedders that drive the engine without a socket.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::types::envelope::Envelope;

use super::{Channel, Connection};

/// Engine-side outbound half of an in-process pair
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Envelope>,
    open: AtomicBool,
}

/// Peer-side half of an in-process pair
pub struct MemoryPeer {
    inbound_tx: Option<mpsc::UnboundedSender<Result<Envelope>>>,
    outbound_rx: mpsc::UnboundedReceiver<Envelope>,
    channel: Arc<MemoryChannel>,
}

impl MemoryChannel {
    /// Create a connected pair: the engine-side connection and the peer
    #[must_use]
    pub fn pair() -> (Connection, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            tx: out_tx,
            open: AtomicBool::new(true),
        });
        let connection = Connection {
            channel: channel.clone(),
            inbound: in_rx,
        };
        let peer = MemoryPeer {
            inbound_tx: Some(in_tx),
            outbound_rx: out_rx,
            channel,
        };
        (connection, peer)
    }
}

impl Channel for MemoryChannel {
    fn send(&self, envelope: Envelope) -> BoxFuture<'_, Result<()>> {
        let result = if self.open.load(Ordering::SeqCst) {
            self.tx
                .send(envelope)
                .map_err(|_| SessionError::channel_closed("peer dropped"))
        } else {
            Err(SessionError::channel_closed("channel closed"))
        };
        Box::pin(async move { result })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        self.open.store(false, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

impl MemoryPeer {
    /// Deliver an envelope to the engine
    ///
    /// Returns `false` once the engine side stopped reading or the peer hung up.
    pub fn send(&self, envelope: Envelope) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(envelope)).is_ok())
    }

    /// Deliver a raw inbound error (e.g. a malformed frame)
    pub fn send_error(&self, error: SessionError) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// Next envelope sent by the engine
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.outbound_rx.recv().await
    }

    /// Next envelope sent by the engine, if one is already queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.outbound_rx.try_recv().ok()
    }

    /// End the inbound stream, as a peer disconnect would
    pub fn hang_up(&mut self) {
        self.inbound_tx = None;
    }

    /// Break the outbound half so engine sends fail
    pub fn break_outbound(&self) {
        self.channel.open.store(false, Ordering::SeqCst);
    }
}
