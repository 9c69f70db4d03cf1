//! Running state of a character's workflow
//!
//! Each field has a named update method with a fixed merge rule; there is no
//! generic structural merge.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::types::identifiers::CharacterId;
use crate::types::profile::{Profile, Vitals};

/// Objectives planned at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveEntry {
    /// Ordered objectives
    pub objectives: Vec<String>,
    /// When they were planned
    pub planned_at: DateTime<Utc>,
}

/// Bounded, append-only decision history
///
/// Every sequence keeps at most `capacity` entries; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct DecisionLog {
    capacity: usize,
    objectives: VecDeque<ObjectiveEntry>,
    meta_sequences: VecDeque<Vec<String>>,
    reflections: VecDeque<String>,
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if buffer.len() == capacity {
        buffer.pop_front(); // Remove oldest
    }
    buffer.push_back(item);
}

impl DecisionLog {
    /// Create an empty log
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            objectives: VecDeque::with_capacity(capacity),
            meta_sequences: VecDeque::with_capacity(capacity),
            reflections: VecDeque::with_capacity(capacity),
        }
    }

    /// Objective entries, oldest first
    pub fn objectives(&self) -> impl Iterator<Item = &ObjectiveEntry> {
        self.objectives.iter()
    }

    /// Action sequences, oldest first
    pub fn meta_sequences(&self) -> impl Iterator<Item = &Vec<String>> {
        self.meta_sequences.iter()
    }

    /// Reflections, oldest first
    pub fn reflections(&self) -> impl Iterator<Item = &String> {
        self.reflections.iter()
    }
}

/// Mutable working memory of one character's workflow
#[derive(Debug, Clone)]
pub struct RunningState {
    /// Owning character
    pub character_id: CharacterId,
    /// Profile snapshot
    pub profile: Profile,
    /// Inventory and vitals
    pub vitals: Vitals,
    /// Decision history
    pub log: DecisionLog,
}

impl RunningState {
    /// Fresh state with a placeholder profile
    #[must_use]
    pub fn new(character_id: CharacterId, log_capacity: usize) -> Self {
        Self {
            character_id,
            profile: Profile::placeholder(character_id),
            vitals: Vitals::default(),
            log: DecisionLog::new(log_capacity),
        }
    }

    /// Replace the profile snapshot
    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
    }

    /// Merge a partial vitals update
    pub fn apply_vitals(&mut self, update: &Map<String, Value>) {
        self.vitals.apply(update);
    }

    /// Append a set of objectives to the log
    pub fn append_objectives(&mut self, objectives: Vec<String>) {
        let capacity = self.log.capacity;
        push_bounded(
            &mut self.log.objectives,
            ObjectiveEntry {
                objectives,
                planned_at: Utc::now(),
            },
            capacity,
        );
    }

    /// Make `sequence` the current action list (previous ones stay in the log)
    pub fn replace_meta_sequence(&mut self, sequence: Vec<String>) {
        let capacity = self.log.capacity;
        push_bounded(&mut self.log.meta_sequences, sequence, capacity);
    }

    /// Append a reflection to the log
    pub fn append_reflection(&mut self, reflection: String) {
        let capacity = self.log.capacity;
        push_bounded(&mut self.log.reflections, reflection, capacity);
    }

    /// Latest planned objectives
    #[must_use]
    pub fn current_objectives(&self) -> Vec<String> {
        self.log
            .objectives
            .back()
            .map(|e| e.objectives.clone())
            .unwrap_or_default()
    }

    /// First of the latest objectives
    #[must_use]
    pub fn current_objective(&self) -> Option<String> {
        self.log
            .objectives
            .back()
            .and_then(|e| e.objectives.first().cloned())
    }

    /// Current action list
    #[must_use]
    pub fn current_meta_sequence(&self) -> Vec<String> {
        self.log.meta_sequences.back().cloned().unwrap_or_default()
    }

    /// Objectives from the newest `entries` log entries, newest entry first
    #[must_use]
    pub fn recent_objectives(&self, entries: usize) -> Vec<String> {
        self.log
            .objectives
            .iter()
            .rev()
            .take(entries)
            .flat_map(|e| e.objectives.iter().cloned())
            .collect()
    }

    /// Newest `n` reflections, newest first
    #[must_use]
    pub fn recent_reflections(&self, n: usize) -> Vec<String> {
        self.log.reflections.iter().rev().take(n).cloned().collect()
    }
}
