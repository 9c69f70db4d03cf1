//! Detachable per-session channel with a send lock
//!
//! Both engines of a session send through the same `SessionChannel`. The
//! attached channel can be swapped out (demotion detaches it, re-activation
//! attaches a new one); each attach bumps a generation so that failures
//! observed on an old channel cannot demote a session that has moved on.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::types::envelope::Envelope;
use crate::types::identifiers::CharacterId;

use super::Channel;

/// Report of a broken channel, consumed by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFault {
    /// Affected character
    pub character_id: CharacterId,
    /// Generation of the channel that failed
    pub generation: u64,
}

#[derive(Clone)]
struct Attached {
    channel: Arc<dyn Channel>,
    generation: u64,
}

/// Session-owned handle to the character's current channel
pub struct SessionChannel {
    character_id: CharacterId,
    slot: Mutex<Option<Attached>>,
    next_generation: AtomicU64,
    send_lock: tokio::sync::Mutex<()>,
    faults: mpsc::UnboundedSender<ChannelFault>,
}

impl SessionChannel {
    /// Create a channel handle with `channel` attached as generation 1
    pub fn new(
        character_id: CharacterId,
        channel: Arc<dyn Channel>,
        faults: mpsc::UnboundedSender<ChannelFault>,
    ) -> Self {
        Self {
            character_id,
            slot: Mutex::new(Some(Attached {
                channel,
                generation: 1,
            })),
            next_generation: AtomicU64::new(2),
            send_lock: tokio::sync::Mutex::new(()),
            faults,
        }
    }

    /// Attach a new live channel, returning its generation
    pub fn attach(&self, channel: Arc<dyn Channel>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock() = Some(Attached {
            channel,
            generation,
        });
        generation
    }

    /// Detach the current channel; later sends fail fast
    pub fn detach(&self) -> Option<Arc<dyn Channel>> {
        self.slot.lock().take().map(|a| a.channel)
    }

    /// Whether a channel is attached
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Generation of the attached channel, if any
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|a| a.generation)
    }

    /// Send through the attached channel
    ///
    /// Sends from concurrent routines are serialized. A failed send reports a
    /// [`ChannelFault`] and is not retried.
    ///
    /// # Errors
    /// Returns `SessionError::ChannelDetached` if nothing is attached, or the
    /// underlying channel error
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        let attached = self
            .slot
            .lock()
            .clone()
            .ok_or(SessionError::ChannelDetached(self.character_id))?;

        let _guard = self.send_lock.lock().await;
        let result = if attached.channel.is_open() {
            attached.channel.send(envelope).await
        } else {
            Err(SessionError::channel_closed("channel closed"))
        };

        if let Err(e) = &result
            && e.is_channel_error()
        {
            let _ = self.faults.send(ChannelFault {
                character_id: self.character_id,
                generation: attached.generation,
            });
        }
        result
    }

    /// Send, logging instead of propagating a channel failure
    ///
    /// Returns `true` if the envelope was handed to the channel.
    pub async fn send_logged(&self, envelope: Envelope) -> bool {
        let name = envelope.message_name.clone();
        match self.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[char {}] Dropped outbound '{name}': {e}", self.character_id);
                false
            }
        }
    }
}
