//! Character profile snapshot

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::identifiers::CharacterId;

/// Profile document as held in the `profiles` collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Owning character
    #[serde(default)]
    pub id: Option<CharacterId>,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Current occupation, if any
    #[serde(default)]
    pub occupation: Option<String>,
    /// Conversations the character still has energy for today
    #[serde(default)]
    pub social_capacity: u32,
    /// Remaining free-form attributes passed through to the planner
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    /// Placeholder used until the stored profile is loaded
    #[must_use]
    pub fn placeholder(id: CharacterId) -> Self {
        Self {
            id: Some(id),
            name: format!("character-{id}"),
            ..Self::default()
        }
    }
}

/// Inventory and vital signs reported by the world
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    /// Health points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f64>,
    /// Energy points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    /// Cash on hand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub money: Option<f64>,
    /// Item name to count
    #[serde(default)]
    pub inventory: std::collections::BTreeMap<String, i64>,
}

impl Vitals {
    /// Merge a partial update reported with an action result
    ///
    /// Numeric vitals are replaced; inventory entries are replaced per item
    /// and removed when their count drops to zero. Unknown keys are ignored.
    pub fn apply(&mut self, update: &Map<String, Value>) {
        for (key, value) in update {
            match key.as_str() {
                "health" => self.health = value.as_f64().or(self.health),
                "energy" => self.energy = value.as_f64().or(self.energy),
                "money" => self.money = value.as_f64().or(self.money),
                "inventory" => {
                    if let Some(items) = value.as_object() {
                        for (item, count) in items {
                            match count.as_i64() {
                                Some(0) => {
                                    self.inventory.remove(item);
                                }
                                Some(n) => {
                                    self.inventory.insert(item.clone(), n);
                                }
                                None => {}
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
