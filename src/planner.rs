//! Planner collaborator
//!
//! The planner maps explicit state to a decision. It is fallible and may take
//! variable time; callers go through [`plan_with_retry`], which makes up to a
//! fixed number of immediate attempts and treats a decision of the wrong shape
//! like a failed call.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Result, SessionError};
use crate::types::conversation::{AgentMessage, ConversationRecord};
use crate::types::identifiers::CharacterId;
use crate::types::profile::{Profile, Vitals};

// ============================================================================
// Requests
// ============================================================================

/// Context handed to the planner when an action failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    /// The action the world rejected
    pub failed_action: Value,
    /// Failure message from the world
    pub message: String,
    /// Sequence that was being executed
    pub current_meta_seq: Vec<String>,
    /// Objective that sequence served
    pub current_objective: Option<String>,
}

/// Planner request, one variant per decision the engine asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanRequest {
    /// Objectives for the day
    DailyObjectives {
        /// Requesting character
        character: CharacterId,
        /// Profile snapshot
        profile: Profile,
        /// Current vitals
        vitals: Vitals,
        /// Most recent objectives
        recent_objectives: Vec<String>,
        /// Most recent reflections
        reflections: Vec<String>,
    },
    /// Ordered action list serving the objectives
    MetaSequence {
        /// Requesting character
        character: CharacterId,
        /// Profile snapshot
        profile: Profile,
        /// Current vitals
        vitals: Vitals,
        /// Objectives to serve
        objectives: Vec<String>,
    },
    /// Adjusted action list after a failure
    Replan {
        /// Requesting character
        character: CharacterId,
        /// What failed and what was running
        context: ErrorContext,
    },
    /// Pick a job opening and write a CV
    JobApplication {
        /// Requesting character
        character: CharacterId,
        /// Profile snapshot
        profile: Profile,
        /// Open positions
        openings: Vec<Value>,
    },
    /// Decide pending applications
    MayorDecision {
        /// Requesting character
        character: CharacterId,
        /// Pending applications
        submissions: Vec<Value>,
    },
    /// Reflect on recent decisions
    Reflect {
        /// Requesting character
        character: CharacterId,
        /// Recent objectives
        objectives: Vec<String>,
        /// Current action list
        meta_sequence: Vec<String>,
    },
    /// Reply to an incoming conversation turn
    Reply {
        /// Requesting character
        character: CharacterId,
        /// Profile snapshot
        profile: Profile,
        /// Current impression of the partner
        impression: Option<Value>,
        /// Recent conversations with the partner
        history: Vec<Value>,
        /// Turn being answered
        incoming: AgentMessage,
    },
    /// Update the impression of a partner after a conversation
    Impression {
        /// Requesting character
        character: CharacterId,
        /// Conversation partner
        partner: CharacterId,
        /// Completed conversation
        record: ConversationRecord,
    },
    /// Update the intimacy with a partner after a conversation
    Intimacy {
        /// Requesting character
        character: CharacterId,
        /// Conversation partner
        partner: CharacterId,
        /// Completed conversation
        record: ConversationRecord,
    },
    /// Topics for the day's outbound conversations
    DailyTopics {
        /// Requesting character
        character: CharacterId,
        /// Profile snapshot
        profile: Profile,
        /// Recent objective documents
        recent_objectives: Vec<Value>,
        /// Character arc, if any
        arc: Option<Value>,
        /// Topics already used
        past_topics: Vec<String>,
    },
    /// Re-check whether a planned conversation is still worth starting
    ConversationNecessity {
        /// Requesting character
        character: CharacterId,
        /// Planned topic
        topic: String,
        /// Profile snapshot
        profile: Profile,
    },
    /// Opening line of an outbound conversation
    Opening {
        /// Requesting character
        character: CharacterId,
        /// Chosen partner
        partner: CharacterId,
        /// Planned topic
        topic: String,
        /// Profile snapshot
        profile: Profile,
        /// Current impression of the partner
        impression: Option<Value>,
    },
}

impl PlanRequest {
    /// Short request name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DailyObjectives { .. } => "daily_objectives",
            Self::MetaSequence { .. } => "meta_sequence",
            Self::Replan { .. } => "replan",
            Self::JobApplication { .. } => "job_application",
            Self::MayorDecision { .. } => "mayor_decision",
            Self::Reflect { .. } => "reflect",
            Self::Reply { .. } => "reply",
            Self::Impression { .. } => "impression",
            Self::Intimacy { .. } => "intimacy",
            Self::DailyTopics { .. } => "daily_topics",
            Self::ConversationNecessity { .. } => "conversation_necessity",
            Self::Opening { .. } => "opening",
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Planner output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Objectives for the day
    Objectives {
        /// Ordered objectives
        objectives: Vec<String>,
    },
    /// Ordered action list
    ActionSequence {
        /// Commands to send to the world
        commands: Vec<String>,
    },
    /// Job application
    JobApplication {
        /// Chosen opening
        job: Value,
        /// CV text
        cv: String,
    },
    /// Hiring decisions
    MayorDecision {
        /// One decision per application
        decisions: Vec<Value>,
    },
    /// Reflection text
    Reflection {
        /// Reflection
        text: String,
    },
    /// Conversation utterance (reply or opening)
    Utterance {
        /// What to say
        content: String,
    },
    /// Impression of a partner
    Impression {
        /// Planner-defined impression document
        summary: Value,
    },
    /// Intimacy level with a partner
    Intimacy {
        /// New level
        level: i64,
    },
    /// Topics for the day
    Topics {
        /// Ordered topics
        topics: Vec<String>,
    },
    /// Whether a planned conversation is still needed
    Necessity {
        /// Still needed
        needed: bool,
    },
}

// ============================================================================
// Planner trait
// ============================================================================

/// External decision-making collaborator
pub trait Planner: Send + Sync {
    /// Produce a decision for the request
    ///
    /// # Errors
    /// Returns error if the underlying call fails
    fn plan<'a>(&'a self, request: &'a PlanRequest) -> BoxFuture<'a, Result<Decision>>;
}

/// Planner backed by a closure
pub struct FnPlanner<F> {
    f: F,
}

impl<F, Fut> Planner for FnPlanner<F>
where
    F: Fn(PlanRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Decision>> + Send + 'static,
{
    fn plan<'a>(&'a self, request: &'a PlanRequest) -> BoxFuture<'a, Result<Decision>> {
        Box::pin((self.f)(request.clone()))
    }
}

/// Create a planner from a closure
pub fn planner_fn<F, Fut>(f: F) -> Arc<dyn Planner>
where
    F: Fn(PlanRequest) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Decision>> + Send + 'static,
{
    Arc::new(FnPlanner { f })
}

/// Call the planner with bounded immediate retry
///
/// `extract` pulls the expected variant out of the decision; a decision of
/// another shape counts as a failed attempt.
///
/// # Arguments
/// * `planner` - The planner to call
/// * `request` - Request to send (reused across attempts)
/// * `attempts` - Maximum number of calls (at least one is made)
/// * `extract` - Maps the decision to the expected value
///
/// # Errors
/// Returns `SessionError::PlannerFailure` once every attempt has failed
pub async fn plan_with_retry<T, X>(
    planner: &dyn Planner,
    request: &PlanRequest,
    attempts: u32,
    extract: X,
) -> Result<T>
where
    X: Fn(Decision) -> Option<T>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match planner.plan(request).await {
            Ok(decision) => match extract(decision) {
                Some(value) => return Ok(value),
                None => {
                    last_error = format!("unexpected decision shape for '{}'", request.name());
                }
            },
            Err(e) => {
                last_error = e.to_string();
            }
        }
        log::debug!(
            "Planner '{}' attempt {attempt}/{attempts} failed: {last_error}",
            request.name()
        );
    }

    Err(SessionError::planner_failure(last_error, attempts))
}
