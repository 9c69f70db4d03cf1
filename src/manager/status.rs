//! Read-only session status snapshots for monitoring

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::identifiers::CharacterId;
use crate::workflow::WorkflowNode;

/// Whether a session is bound to a live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Bound to a live channel
    Active,
    /// Channel detached, waiting for reconnection or reaping
    Hosted,
}

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Character
    pub character_id: CharacterId,
    /// Active or hosted
    pub state: SessionState,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last heartbeat (wall clock)
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Heartbeats received since activation
    pub heartbeat_count: u64,
    /// Consecutive scans that found the character silent
    pub missed_count: u32,
    /// Seconds left before a hosted session is purged
    pub purge_remaining_secs: Option<u64>,
    /// Whether a workflow node failed fatally
    pub terminated: bool,
    /// Current workflow node
    pub current_node: WorkflowNode,
    /// Turns waiting for a reply
    pub waiting_responses: usize,
    /// Planned conversation starts left today
    pub daily_tasks: usize,
}
