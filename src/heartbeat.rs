//! Heartbeat registry for character liveness
//!
//! Tracks when each character was last heard from. Scanning only reports
//! candidates; the session manager decides what to do with them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::identifiers::CharacterId;

/// Liveness record for one character
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatRecord {
    /// Tracked character
    pub character_id: CharacterId,
    /// Monotonic time of the last heartbeat
    pub last_seen_at: Instant,
    /// Wall-clock time of the last heartbeat
    pub last_seen_wall: DateTime<Utc>,
    /// Heartbeats received since activation
    pub beat_count: u64,
    /// Scans that found the character timed out since its last heartbeat
    pub missed_count: u32,
}

/// Registry of last-seen times
#[derive(Default)]
pub struct HeartbeatRegistry {
    records: Mutex<HashMap<CharacterId, HeartbeatRecord>>,
}

impl HeartbeatRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a character (activation); counts as a heartbeat
    pub fn register(&self, id: CharacterId) {
        self.records.lock().insert(
            id,
            HeartbeatRecord {
                character_id: id,
                last_seen_at: Instant::now(),
                last_seen_wall: Utc::now(),
                beat_count: 0,
                missed_count: 0,
            },
        );
    }

    /// Record a heartbeat: `lastSeenAt = now`
    pub fn touch(&self, id: CharacterId) {
        let mut records = self.records.lock();
        let record = records.entry(id).or_insert_with(|| HeartbeatRecord {
            character_id: id,
            last_seen_at: Instant::now(),
            last_seen_wall: Utc::now(),
            beat_count: 0,
            missed_count: 0,
        });
        record.last_seen_at = Instant::now();
        record.last_seen_wall = Utc::now();
        record.beat_count += 1;
        record.missed_count = 0;
    }

    /// Whether the character was heard from within `timeout`
    #[must_use]
    pub fn is_alive(&self, id: CharacterId, timeout: Duration) -> bool {
        self.records
            .lock()
            .get(&id)
            .is_some_and(|r| r.last_seen_at.elapsed() <= timeout)
    }

    /// Characters silent for longer than `timeout`
    ///
    /// Does not mutate the registry.
    #[must_use]
    pub fn scan(&self, timeout: Duration) -> Vec<CharacterId> {
        let now = Instant::now();
        let mut ids: Vec<CharacterId> = self
            .records
            .lock()
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen_at) > timeout)
            .map(|r| r.character_id)
            .collect();
        ids.sort();
        ids
    }

    /// Count a missed scan against each character
    pub fn mark_missed(&self, ids: &[CharacterId]) {
        let mut records = self.records.lock();
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                record.missed_count = record.missed_count.saturating_add(1);
            }
        }
    }

    /// Snapshot of a character's record
    #[must_use]
    pub fn record(&self, id: CharacterId) -> Option<HeartbeatRecord> {
        self.records.lock().get(&id).cloned()
    }

    /// Stop tracking a character (purge)
    pub fn remove(&self, id: CharacterId) -> Option<HeartbeatRecord> {
        self.records.lock().remove(&id)
    }

    /// Number of tracked characters
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no character is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
