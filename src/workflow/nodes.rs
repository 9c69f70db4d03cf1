//! Workflow node handlers
//!
//! Each handler reads the inputs it needs from [`RunningState`] under a short
//! lock, calls the planner without holding it, then applies the result through
//! a named update method.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use crate::context::EngineContext;
use crate::error::Result;
use crate::planner::{Decision, ErrorContext, PlanRequest, plan_with_retry};
use crate::store::{Query, collections};
use crate::types::envelope::{Envelope, MessageCode, names};
use crate::types::events::FailedAction;

use super::state::RunningState;

/// Objectives kept in the history handed to the planner
const RECENT_OBJECTIVE_ENTRIES: usize = 5;

/// Reflections handed to the planner
const RECENT_REFLECTIONS: usize = 3;

/// Open positions considered per job hunt
const JOB_LOOKUP_LIMIT: usize = 20;

/// Applications considered per mayor decision
const SUBMISSION_LOOKUP_LIMIT: usize = 50;

/// Load `profiles/<id>` into the running state
///
/// A missing profile keeps the placeholder.
pub(super) async fn load_profile(ctx: &EngineContext, state: &Mutex<RunningState>) -> Result<()> {
    let key = ctx.character_id.key();
    if let Some(profile) =
        crate::store::get_as(ctx.store.as_ref(), collections::PROFILES, &key).await?
    {
        state.lock().set_profile(profile);
    } else {
        log::debug!("[char {}] No stored profile, using placeholder", ctx.character_id);
    }
    Ok(())
}

/// Plan the day's objectives
pub(super) async fn objectives_planner(
    ctx: &EngineContext,
    state: &Mutex<RunningState>,
) -> Result<Vec<String>> {
    let request = {
        let s = state.lock();
        PlanRequest::DailyObjectives {
            character: ctx.character_id,
            profile: s.profile.clone(),
            vitals: s.vitals.clone(),
            recent_objectives: s.recent_objectives(RECENT_OBJECTIVE_ENTRIES),
            reflections: s.recent_reflections(RECENT_REFLECTIONS),
        }
    };

    let objectives = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Objectives { objectives } => Some(objectives),
            _ => None,
        },
    )
    .await?;

    state.lock().append_objectives(objectives.clone());
    ctx.store
        .append(
            collections::OBJECTIVES,
            json!({
                "characterId": ctx.character_id,
                "objectives": objectives,
                "plannedAt": Utc::now().to_rfc3339(),
            }),
        )
        .await?;

    log::info!(
        "[char {}] Planned {} objectives",
        ctx.character_id,
        objectives.len()
    );
    Ok(objectives)
}

/// Plan an action list for `objectives` and send it
pub(super) async fn meta_sequence_planner(
    ctx: &EngineContext,
    state: &Mutex<RunningState>,
    objectives: Vec<String>,
) -> Result<()> {
    let request = {
        let s = state.lock();
        PlanRequest::MetaSequence {
            character: ctx.character_id,
            profile: s.profile.clone(),
            vitals: s.vitals.clone(),
            objectives,
        }
    };

    let commands = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        extract_commands,
    )
    .await?;

    commit_sequence(ctx, state, commands, false).await
}

/// Plan an adjusted action list after a failed action
///
/// Pops exactly one entry from the failed-action queue.
pub(super) async fn replan_action(
    ctx: &EngineContext,
    state: &Mutex<RunningState>,
    failed_rx: &mut mpsc::UnboundedReceiver<FailedAction>,
) -> Result<()> {
    let Some(failed) = failed_rx.recv().await else {
        return Ok(());
    };

    let context = {
        let s = state.lock();
        ErrorContext {
            failed_action: failed.action,
            message: failed.message,
            current_meta_seq: s.current_meta_sequence(),
            current_objective: s.current_objective(),
        }
    };
    let request = PlanRequest::Replan {
        character: ctx.character_id,
        context,
    };

    let commands = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        extract_commands,
    )
    .await?;

    commit_sequence(ctx, state, commands, true).await
}

/// Apply for a job: look up openings, plan an application, submit it
pub(super) async fn change_job(ctx: &EngineContext, state: &Mutex<RunningState>) -> Result<()> {
    let openings = ctx
        .store
        .query(collections::JOBS, &Query::all().limit(JOB_LOOKUP_LIMIT))
        .await?;

    if openings.is_empty() {
        log::info!("[char {}] No job openings", ctx.character_id);
        return Ok(());
    }

    let request = PlanRequest::JobApplication {
        character: ctx.character_id,
        profile: state.lock().profile.clone(),
        openings,
    };
    let (job, cv) = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::JobApplication { job, cv } => Some((job, cv)),
            _ => None,
        },
    )
    .await?;

    ctx.store
        .append(
            collections::CV_SUBMISSIONS,
            json!({ "characterId": ctx.character_id, "job": job, "cv": cv }),
        )
        .await?;

    ctx.channel
        .send_logged(Envelope::new(
            ctx.character_id,
            MessageCode::CvSubmission,
            names::CV_SUBMISSION,
            json!({ "job": job, "cv": cv }),
        ))
        .await;
    Ok(())
}

/// Decide pending job applications
pub(super) async fn mayor_decision(ctx: &EngineContext) -> Result<()> {
    let submissions = ctx
        .store
        .query(
            collections::CV_SUBMISSIONS,
            &Query::all().newest_first().limit(SUBMISSION_LOOKUP_LIMIT),
        )
        .await?;

    if submissions.is_empty() {
        log::debug!("[char {}] No applications to decide", ctx.character_id);
        return Ok(());
    }

    let request = PlanRequest::MayorDecision {
        character: ctx.character_id,
        submissions,
    };
    let decisions = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::MayorDecision { decisions } => Some(decisions),
            _ => None,
        },
    )
    .await?;

    ctx.channel
        .send_logged(Envelope::new(
            ctx.character_id,
            MessageCode::MayorDecision,
            names::MAYOR_DECISION,
            json!({ "decisions": decisions }),
        ))
        .await;
    Ok(())
}

/// Reflect on recent objectives and the current action list
pub(super) async fn reflect(ctx: &EngineContext, state: &Mutex<RunningState>) -> Result<()> {
    let request = {
        let s = state.lock();
        PlanRequest::Reflect {
            character: ctx.character_id,
            objectives: s.recent_objectives(RECENT_OBJECTIVE_ENTRIES),
            meta_sequence: s.current_meta_sequence(),
        }
    };

    let text = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Reflection { text } => Some(text),
            _ => None,
        },
    )
    .await?;

    state.lock().append_reflection(text.clone());
    ctx.store
        .append(
            collections::REFLECTIONS,
            json!({
                "characterId": ctx.character_id,
                "reflection": text,
                "createdAt": Utc::now().to_rfc3339(),
            }),
        )
        .await
}

fn extract_commands(decision: Decision) -> Option<Vec<String>> {
    match decision {
        Decision::ActionSequence { commands } => Some(commands),
        _ => None,
    }
}

/// Record a new action list, persist it and send it to the world
async fn commit_sequence(
    ctx: &EngineContext,
    state: &Mutex<RunningState>,
    commands: Vec<String>,
    replan: bool,
) -> Result<()> {
    state.lock().replace_meta_sequence(commands.clone());
    ctx.store
        .append(
            collections::META_SEQUENCES,
            json!({
                "characterId": ctx.character_id,
                "commands": commands,
                "replan": replan,
                "createdAt": Utc::now().to_rfc3339(),
            }),
        )
        .await?;

    ctx.channel
        .send_logged(Envelope::action_list(ctx.character_id, &commands))
        .await;
    Ok(())
}
