//! Workflow events and failed-action payloads

use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic trigger routed by the workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEvent {
    /// Plan daily objectives and a meta-action sequence
    Plan,
    /// Adjust the current sequence after a failed action
    Replan,
    /// Look for a job, then decide hires
    JobHunting,
    /// Reflect on recent decisions
    Reflect,
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plan => "PLAN",
            Self::Replan => "REPLAN",
            Self::JobHunting => "JOB_HUNTING",
            Self::Reflect => "REFLECT",
        };
        f.write_str(name)
    }
}

/// Failed domain action awaiting a replan
///
/// This is data, not an error: the game world reported that an action could
/// not be carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAction {
    /// The action that failed, as reported by the world
    pub action: serde_json::Value,
    /// Failure message from the world
    #[serde(default)]
    pub message: String,
}
