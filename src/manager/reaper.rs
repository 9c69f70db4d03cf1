//! Deferred cleanup of tasks left behind by hosted sessions
//!
//! Each pending entry owns a timer task. A timer only fires for the deadline
//! it was armed with, so rescheduling never lets a stale timer reap early.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::types::identifiers::CharacterId;

struct OrphanEntry {
    tasks: Vec<AbortHandle>,
    expires_at: Instant,
    timer: AbortHandle,
}

type Entries = Arc<Mutex<HashMap<CharacterId, OrphanEntry>>>;

/// Pending purges of hosted sessions' tasks
pub struct OrphanReaper {
    entries: Entries,
    expired_tx: mpsc::UnboundedSender<CharacterId>,
}

impl OrphanReaper {
    /// Create a reaper and the receiver of expiry notifications
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CharacterId>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: Arc::new(Mutex::new(HashMap::new())),
                expired_tx,
            },
            expired_rx,
        )
    }

    /// Register a deferred purge of `tasks` after `after`
    ///
    /// Replaces any pending entry for the same character.
    pub fn schedule(&self, id: CharacterId, tasks: Vec<AbortHandle>, after: Duration) {
        let expires_at = Instant::now() + after;
        // Armed under the lock so the timer cannot look before the insert
        let mut entries = self.entries.lock();
        let timer = self.arm(id, expires_at);
        let previous = entries.insert(
            id,
            OrphanEntry {
                tasks,
                expires_at,
                timer,
            },
        );
        drop(entries);
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        log::debug!("[char {id}] Orphan purge scheduled in {after:?}");
    }

    /// Push a pending purge back by `by`
    ///
    /// Returns `false` if nothing is pending for the character.
    pub fn extend(&self, id: CharacterId, by: Duration) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        entry.expires_at += by;
        entry.timer.abort();
        entry.timer = self.arm(id, entry.expires_at);
        log::debug!("[char {id}] Orphan purge extended by {by:?}");
        true
    }

    /// Remove a pending purge without cancelling its tasks
    ///
    /// Returns the retained task handles and the grace time that was left.
    pub fn cancel(&self, id: CharacterId) -> Option<(Vec<AbortHandle>, Duration)> {
        let entry = self.entries.lock().remove(&id)?;
        entry.timer.abort();
        let remaining = entry.expires_at.saturating_duration_since(Instant::now());
        Some((entry.tasks, remaining))
    }

    /// Cancel the pending entry's tasks now
    ///
    /// Returns `false` if nothing was pending; calling it again is a no-op.
    pub fn purge(&self, id: CharacterId) -> bool {
        let Some(entry) = self.entries.lock().remove(&id) else {
            return false;
        };
        entry.timer.abort();
        abort_unfinished(&entry.tasks);
        true
    }

    /// Time left before the pending purge fires
    #[must_use]
    pub fn remaining(&self, id: CharacterId) -> Option<Duration> {
        self.entries
            .lock()
            .get(&id)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Whether a purge is pending for the character
    #[must_use]
    pub fn is_pending(&self, id: CharacterId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of pending purges
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no purge is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cancel every pending entry's tasks (shutdown)
    pub fn purge_all(&self) {
        let drained: Vec<OrphanEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.timer.abort();
            abort_unfinished(&entry.tasks);
        }
    }

    fn arm(&self, id: CharacterId, deadline: Instant) -> AbortHandle {
        let entries = Arc::clone(&self.entries);
        let expired_tx = self.expired_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let expired = {
                let mut entries = entries.lock();
                match entries.get(&id) {
                    Some(entry) if entry.expires_at == deadline => entries.remove(&id),
                    _ => None,
                }
            };
            if let Some(entry) = expired {
                log::info!("[char {id}] Grace period elapsed, reaping orphaned tasks");
                abort_unfinished(&entry.tasks);
                let _ = expired_tx.send(id);
            }
        })
        .abort_handle()
    }
}

impl Drop for OrphanReaper {
    fn drop(&mut self) {
        for entry in self.entries.lock().values() {
            entry.timer.abort();
        }
    }
}

fn abort_unfinished(tasks: &[AbortHandle]) {
    for task in tasks.iter().filter(|t| !t.is_finished()) {
        task.abort();
    }
}
