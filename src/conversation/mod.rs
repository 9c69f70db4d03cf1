//! Per-character conversation engine
//!
//! Five cooperating routines share one [`ConversationState`]:
//!
//! - **classifier**: sorts inbound conversation messages into the state
//! - **reply worker**: answers waiting turns one at a time
//! - **reconciler**: periodically persists observed transcripts and updates
//!   impression and intimacy for each pair
//! - **daily planner**: plans the day's outbound conversations when the plan
//!   trigger is raised
//! - **starter loop**: opens the planned conversations in stored order

mod classifier;
mod daily_plan;
mod reconcile;
mod reply;
pub mod schedule;
mod starter;
pub mod state;

pub use state::ConversationState;

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::context::EngineContext;
use crate::error::{Result, SessionError};
use crate::message::InboundMessage;
use crate::types::identifiers::CharacterId;

/// Directed key for per-partner documents (`impressions`, `intimacy`)
#[must_use]
pub fn relation_key(me: CharacterId, partner: CharacterId) -> String {
    format!("{me}->{partner}")
}

/// Key of a character's stored plan for a game date
#[must_use]
pub fn plan_key(me: CharacterId, date: NaiveDate) -> String {
    format!("{me}:{date}")
}

/// Handle to a running conversation engine
pub struct ConversationEngine {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    state: Arc<ConversationState>,
    tasks: Vec<AbortHandle>,
}

impl ConversationEngine {
    /// Spawn the five routines
    pub fn spawn(ctx: EngineContext) -> Self {
        let state = Arc::new(ConversationState::new(ctx.character_id));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(classifier::run(Arc::clone(&state), inbound_rx)).abort_handle(),
            tokio::spawn(reply::run(ctx.clone(), Arc::clone(&state))).abort_handle(),
            tokio::spawn(reconcile::run(ctx.clone(), Arc::clone(&state))).abort_handle(),
            tokio::spawn(daily_plan::run(ctx.clone(), Arc::clone(&state))).abort_handle(),
            tokio::spawn(starter::run(ctx, Arc::clone(&state))).abort_handle(),
        ];

        Self {
            inbound_tx,
            state,
            tasks,
        }
    }

    /// Hand a conversation message to the classifier
    ///
    /// # Errors
    /// Returns `SessionError::SessionTerminated` if the classifier has stopped
    pub fn route(&self, message: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(message)
            .map_err(|_| SessionError::SessionTerminated(self.state.character_id()))
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> &Arc<ConversationState> {
        &self.state
    }

    /// Abort handles of the five routines
    #[must_use]
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.tasks.clone()
    }
}
