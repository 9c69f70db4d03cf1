//! Per-character session
//!
//! A session bundles the character's channel handle with its two engines.
//! It is created on a successful handshake and lives, active or hosted,
//! until it is purged.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::AbortHandle;

use crate::context::EngineContext;
use crate::conversation::ConversationEngine;
use crate::error::{Result, SessionError};
use crate::message::InboundMessage;
use crate::transport::SessionChannel;
use crate::types::events::WorkflowEvent;
use crate::types::identifiers::CharacterId;
use crate::workflow::WorkflowEngine;

/// Live (or parked) state of one character
pub struct Session {
    id: CharacterId,
    channel: Arc<SessionChannel>,
    workflow: WorkflowEngine,
    conversation: ConversationEngine,
    created_at: DateTime<Utc>,
    terminated: Arc<AtomicBool>,
}

impl Session {
    /// Spawn both engines for `ctx`
    pub(super) fn spawn(ctx: EngineContext) -> Self {
        let terminated = Arc::new(AtomicBool::new(false));
        let id = ctx.character_id;
        let channel = Arc::clone(&ctx.channel);
        let workflow = WorkflowEngine::spawn(ctx.clone(), Arc::clone(&terminated));
        let conversation = ConversationEngine::spawn(ctx);

        log::info!("[char {id}] Session created");
        Self {
            id,
            channel,
            workflow,
            conversation,
            created_at: Utc::now(),
            terminated,
        }
    }

    /// Owning character
    #[must_use]
    pub fn id(&self) -> CharacterId {
        self.id
    }

    /// Channel handle shared by both engines
    #[must_use]
    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }

    /// Workflow engine
    #[must_use]
    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    /// Conversation engine
    #[must_use]
    pub fn conversation(&self) -> &ConversationEngine {
        &self.conversation
    }

    /// Creation time
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether a workflow node failed fatally
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Handles of every background task of the session
    #[must_use]
    pub fn task_handles(&self) -> Vec<AbortHandle> {
        let mut handles = self.conversation.abort_handles();
        handles.push(self.workflow.abort_handle());
        handles
    }

    /// Whether every background task has stopped
    #[must_use]
    pub fn tasks_finished(&self) -> bool {
        self.task_handles().iter().all(AbortHandle::is_finished)
    }

    pub(super) fn abort_tasks(&self) {
        for handle in self.task_handles() {
            handle.abort();
        }
    }

    /// Route a parsed inbound message to the engine that owns it
    ///
    /// A failed action becomes queued data plus a `REPLAN` event; a successful
    /// one only merges its vitals.
    ///
    /// # Errors
    /// Returns `SessionError::SessionTerminated` for a terminated session and
    /// `SessionError::Protocol` for messages that are not routable here
    pub fn route(&self, message: InboundMessage) -> Result<()> {
        if self.is_terminated() {
            return Err(SessionError::SessionTerminated(self.id));
        }

        match message {
            InboundMessage::OneStep => self.workflow.enqueue(WorkflowEvent::Plan),
            InboundMessage::NewDay => self.workflow.enqueue(WorkflowEvent::JobHunting),
            InboundMessage::Reflect => self.workflow.enqueue(WorkflowEvent::Reflect),
            InboundMessage::ActionFailed(action) => {
                log::info!("[char {}] Action failed: {}", self.id, action.message);
                self.workflow.push_failed_action(action)
            }
            InboundMessage::ActionSucceeded { vitals } => {
                if let Some(vitals) = vitals {
                    self.workflow.apply_vitals(&vitals);
                }
                Ok(())
            }
            message @ (InboundMessage::GameTime(_)
            | InboundMessage::ReadOnly(_)
            | InboundMessage::ToAgent(_)) => self.conversation.route(message),
            other @ (InboundMessage::Heartbeat | InboundMessage::ConnectionInit) => Err(
                SessionError::protocol(format!("{other:?} is handled by the connection")),
            ),
        }
    }
}
