//! Per-character collaborator bundle shared by both engines

use std::sync::Arc;

use crate::planner::Planner;
use crate::store::Store;
use crate::transport::SessionChannel;
use crate::types::identifiers::CharacterId;
use crate::types::options::EngineOptions;

/// Everything a session's routines need to reach the outside world
#[derive(Clone)]
pub struct EngineContext {
    /// Owning character
    pub character_id: CharacterId,
    /// Decision collaborator
    pub planner: Arc<dyn Planner>,
    /// Document store (already wrapped with the request timeout)
    pub store: Arc<dyn Store>,
    /// Engine options
    pub options: Arc<EngineOptions>,
    /// Outbound channel shared by both engines
    pub channel: Arc<SessionChannel>,
}
