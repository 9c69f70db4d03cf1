//! Newtype wrappers for type safety
//!
//! This module contains newtype wrappers that keep character identities from
//! being mixed up with other integers flowing through the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Newtype Wrappers for Type Safety
// ============================================================================

/// Character ID newtype
///
/// Primary key for every session map. Never reused while an active or hosted
/// session exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(i64);

impl CharacterId {
    /// Create a new character ID
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw integer value
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Store key for documents owned by this character
    #[must_use]
    pub fn key(self) -> String {
        self.0.to_string()
    }

    /// Order-independent key for a pair of characters
    #[must_use]
    pub fn pair_key(a: Self, b: Self) -> String {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        format!("{}:{}", lo.0, hi.0)
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CharacterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
