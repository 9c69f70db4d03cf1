//! Conversation-related type definitions
//!
//! This module contains the records exchanged by the conversation engine:
//! observed transcripts, turns addressed to the character, and the daily
//! plan of outbound conversation starts.

use bitflags::bitflags;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::identifiers::CharacterId;

// ============================================================================
// Finish flags
// ============================================================================

bitflags! {
    /// Per-side completion markers of a two-party conversation
    ///
    /// On the wire this is a `[bool, bool]` pair.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FinishFlags: u8 {
        /// First side has finished
        const FIRST = 0b01;
        /// Second side has finished
        const SECOND = 0b10;
    }
}

impl FinishFlags {
    /// Both sides have finished
    #[must_use]
    pub fn is_complete(self) -> bool {
        self.contains(Self::all())
    }

    /// Flip the first unset flag to set; no-op when complete
    pub fn flip_first_unset(&mut self) {
        if !self.contains(Self::FIRST) {
            self.insert(Self::FIRST);
        } else if !self.contains(Self::SECOND) {
            self.insert(Self::SECOND);
        }
    }

    /// Wire representation
    #[must_use]
    pub fn as_pair(self) -> [bool; 2] {
        [self.contains(Self::FIRST), self.contains(Self::SECOND)]
    }

    /// Build from the wire representation
    #[must_use]
    pub fn from_pair(pair: [bool; 2]) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::FIRST, pair[0]);
        flags.set(Self::SECOND, pair[1]);
        flags
    }
}

impl Serialize for FinishFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_pair().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FinishFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[bool; 2]>::deserialize(deserializer).map(Self::from_pair)
    }
}

// ============================================================================
// Records
// ============================================================================

/// One line of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who spoke
    pub speaker: CharacterId,
    /// What was said
    pub content: String,
}

/// Conversation transcript pending reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    /// The two participants
    pub participants: [CharacterId; 2],
    /// When the conversation started (game time, as sent by the world)
    pub start_time: String,
    /// Transcript so far
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

impl ConversationRecord {
    /// Upsert key: order-independent participant pair plus start time
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (
            CharacterId::pair_key(self.participants[0], self.participants[1]),
            self.start_time.clone(),
        )
    }

    /// The participant that is not `me`
    #[must_use]
    pub fn partner_of(&self, me: CharacterId) -> CharacterId {
        if self.participants[0] == me {
            self.participants[1]
        } else {
            self.participants[0]
        }
    }
}

/// Conversation turn addressed to (or sent by) a character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    /// Sender
    pub from: CharacterId,
    /// Recipient
    pub to: CharacterId,
    /// Utterance
    pub content: String,
    /// Conversation start time, shared by all turns of one conversation
    pub start_time: String,
    /// Completion markers
    #[serde(default)]
    pub finish_flags: FinishFlags,
}

impl AgentMessage {
    /// Fold this turn into a transcript record
    #[must_use]
    pub fn into_record(self) -> ConversationRecord {
        ConversationRecord {
            participants: [self.from, self.to],
            start_time: self.start_time,
            messages: vec![ConversationTurn {
                speaker: self.from,
                content: self.content,
            }],
        }
    }
}

/// Planned outbound conversation start for the current day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedConversation {
    /// Topic to open with
    pub topic: String,
    /// Scheduled game time
    pub scheduled_at: NaiveDateTime,
}
