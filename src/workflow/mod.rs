//! Per-character workflow engine
//!
//! An event-routed state machine. A single driver task owns the event queue
//! receiver, so events are dispatched strictly one at a time:
//!
//! ```text
//! Sensing --PLAN--------> ObjectivesPlanner -> MetaSequencePlanner -> Sensing
//! Sensing --REPLAN------> ReplanAction -------------------------------> Sensing
//! Sensing --JOB_HUNTING-> ChangeJob -> MayorDecision -----------------> Sensing
//! Sensing --REFLECT-----> Reflect ------------------------------------> Sensing
//! ```
//!
//! Planner failures and channel failures leave the engine in Sensing. Any
//! other error, or a panic inside a node, marks the session terminated and
//! ends the driver.

mod nodes;
pub mod state;

pub use state::{DecisionLog, ObjectiveEntry, RunningState};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::context::EngineContext;
use crate::error::{Result, SessionError};
use crate::types::events::{FailedAction, WorkflowEvent};
use crate::types::identifiers::CharacterId;

/// Node the workflow driver is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNode {
    /// Loading the profile before the first wait
    Starting,
    /// Waiting for the next event
    Sensing,
    /// Planning the day's objectives
    ObjectivesPlanner,
    /// Planning the action list
    MetaSequencePlanner,
    /// Replanning after a failed action
    ReplanAction,
    /// Applying for a job
    ChangeJob,
    /// Deciding job applications
    MayorDecision,
    /// Reflecting on recent decisions
    Reflect,
    /// Driver stopped after a fatal node error
    Terminated,
}

impl fmt::Display for WorkflowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Sensing => "sensing",
            Self::ObjectivesPlanner => "objectives_planner",
            Self::MetaSequencePlanner => "meta_sequence_planner",
            Self::ReplanAction => "replan_action",
            Self::ChangeJob => "change_job",
            Self::MayorDecision => "mayor_decision",
            Self::Reflect => "reflect",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Handle to a running workflow engine
pub struct WorkflowEngine {
    character_id: CharacterId,
    events_tx: mpsc::UnboundedSender<WorkflowEvent>,
    failed_tx: mpsc::UnboundedSender<FailedAction>,
    state: Arc<Mutex<RunningState>>,
    node_rx: watch::Receiver<WorkflowNode>,
    driver: AbortHandle,
}

impl WorkflowEngine {
    /// Spawn the driver task
    ///
    /// # Arguments
    /// * `ctx` - Collaborators of the owning session
    /// * `terminated` - Session flag set when a node fails fatally
    pub fn spawn(ctx: EngineContext, terminated: Arc<AtomicBool>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        let (node_tx, node_rx) = watch::channel(WorkflowNode::Starting);
        let character_id = ctx.character_id;
        let state = Arc::new(Mutex::new(RunningState::new(
            ctx.character_id,
            ctx.options.decision_log_capacity,
        )));

        let driver = Driver {
            ctx,
            events_rx,
            failed_rx,
            state: Arc::clone(&state),
            node_tx,
            terminated,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            character_id,
            events_tx,
            failed_tx,
            state,
            node_rx,
            driver: handle.abort_handle(),
        }
    }

    /// Queue a semantic event for the driver
    ///
    /// # Errors
    /// Returns `SessionError::SessionTerminated` if the driver has stopped
    pub fn enqueue(&self, event: WorkflowEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .map_err(|_| SessionError::SessionTerminated(self.character_id))
    }

    /// Queue a failed action and the `REPLAN` event that consumes it
    ///
    /// # Errors
    /// Returns `SessionError::SessionTerminated` if the driver has stopped
    pub fn push_failed_action(&self, action: FailedAction) -> Result<()> {
        self.failed_tx
            .send(action)
            .map_err(|_| SessionError::SessionTerminated(self.character_id))?;
        self.enqueue(WorkflowEvent::Replan)
    }

    /// Merge a vitals update reported with a successful action
    pub fn apply_vitals(&self, update: &serde_json::Map<String, serde_json::Value>) {
        self.state.lock().apply_vitals(update);
    }

    /// Snapshot of the running state
    #[must_use]
    pub fn state(&self) -> RunningState {
        self.state.lock().clone()
    }

    /// Node the driver is currently in
    #[must_use]
    pub fn current_node(&self) -> WorkflowNode {
        *self.node_rx.borrow()
    }

    /// Watch node transitions
    #[must_use]
    pub fn subscribe_nodes(&self) -> watch::Receiver<WorkflowNode> {
        self.node_rx.clone()
    }

    /// Abort handle of the driver task
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.driver.clone()
    }
}

// ============================================================================
// Driver
// ============================================================================

struct Driver {
    ctx: EngineContext,
    events_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    failed_rx: mpsc::UnboundedReceiver<FailedAction>,
    state: Arc<Mutex<RunningState>>,
    node_tx: watch::Sender<WorkflowNode>,
    terminated: Arc<AtomicBool>,
}

impl Driver {
    async fn run(mut self) {
        let id = self.ctx.character_id;

        if let Err(e) = nodes::load_profile(&self.ctx, &self.state).await {
            log::warn!("[char {id}] Profile load failed, using placeholder: {e}");
        }

        loop {
            self.node_tx.send_replace(WorkflowNode::Sensing);
            let Some(event) = self.events_rx.recv().await else {
                log::debug!("[char {id}] Event queue closed, workflow driver exiting");
                break;
            };
            log::debug!("[char {id}] Dispatching {event}");

            let outcome = AssertUnwindSafe(self.dispatch(event)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_recoverable() => {
                    log::warn!("[char {id}] {event} did not complete: {e}");
                }
                Ok(Err(e)) => {
                    self.terminate(&SessionError::fatal(format!("{event}: {e}")));
                    break;
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    self.terminate(&SessionError::fatal(format!("{event} panicked: {msg}")));
                    break;
                }
            }
        }
    }

    async fn dispatch(&mut self, event: WorkflowEvent) -> Result<()> {
        match event {
            WorkflowEvent::Plan => {
                self.node_tx.send_replace(WorkflowNode::ObjectivesPlanner);
                let objectives = nodes::objectives_planner(&self.ctx, &self.state).await?;
                self.node_tx.send_replace(WorkflowNode::MetaSequencePlanner);
                nodes::meta_sequence_planner(&self.ctx, &self.state, objectives).await
            }
            WorkflowEvent::Replan => {
                self.node_tx.send_replace(WorkflowNode::ReplanAction);
                nodes::replan_action(&self.ctx, &self.state, &mut self.failed_rx).await
            }
            WorkflowEvent::JobHunting => {
                self.node_tx.send_replace(WorkflowNode::ChangeJob);
                nodes::change_job(&self.ctx, &self.state).await?;
                self.node_tx.send_replace(WorkflowNode::MayorDecision);
                nodes::mayor_decision(&self.ctx).await
            }
            WorkflowEvent::Reflect => {
                self.node_tx.send_replace(WorkflowNode::Reflect);
                nodes::reflect(&self.ctx, &self.state).await
            }
        }
    }

    fn terminate(&self, reason: &SessionError) {
        log::error!(
            "[char {}] Session terminated: {reason}",
            self.ctx.character_id
        );
        self.terminated.store(true, Ordering::SeqCst);
        self.node_tx.send_replace(WorkflowNode::Terminated);
    }
}
