//! Daily conversation planning, triggered once per game day

use chrono::Days;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::context::EngineContext;
use crate::error::{Result, SessionError};
use crate::planner::{Decision, PlanRequest, plan_with_retry};
use crate::store::{Query, collections, get_as};
use crate::types::conversation::PlannedConversation;
use crate::types::profile::Profile;

use super::schedule::spread_start_times;
use super::state::ConversationState;
use super::plan_key;

/// Objective documents handed to the topic planner
const RECENT_OBJECTIVES: usize = 5;

/// Previous days whose planned topics count as already used
const PAST_PLAN_DAYS: u64 = 7;

pub(super) async fn run(ctx: EngineContext, state: Arc<ConversationState>) {
    let id = ctx.character_id;
    loop {
        let epoch = state.wait_plan_signal().await;
        match plan_day(&ctx, &state).await {
            Ok(count) => log::info!("[char {id}] Planned {count} conversations for today"),
            Err(e) => log::warn!("[char {id}] Daily conversation planning failed: {e}"),
        }
        state.clear_plan_signal(epoch);
    }
}

/// One planning pass; returns the number of planned starts
pub(super) async fn plan_day(ctx: &EngineContext, state: &ConversationState) -> Result<usize> {
    let me = ctx.character_id;
    let now = state
        .game_time()
        .ok_or_else(|| SessionError::protocol("daily planning without a game time"))?;

    if let Some(profile) =
        get_as::<Profile>(ctx.store.as_ref(), collections::PROFILES, &me.key()).await?
    {
        state.set_profile(profile);
    }
    let profile = state.profile();

    let recent_objectives = ctx
        .store
        .query(
            collections::OBJECTIVES,
            &Query::all()
                .eq("characterId", me.get())
                .newest_first()
                .limit(RECENT_OBJECTIVES),
        )
        .await?;
    let arc = ctx.store.get(collections::CHARACTER_ARCS, &me.key()).await?;
    let mut past_topics: Vec<String> = Vec::new();
    let past_days = (1..=PAST_PLAN_DAYS)
        .filter_map(|back| now.date().checked_sub_days(Days::new(back)));
    for date in past_days {
        let Some(plan) = ctx
            .store
            .get(collections::CONVERSATION_PLANS, &plan_key(me, date))
            .await?
        else {
            continue;
        };
        past_topics.extend(
            plan.get("topics")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|t| t.as_str().map(str::to_string)),
        );
    }

    let request = PlanRequest::DailyTopics {
        character: me,
        profile: profile.clone(),
        recent_objectives,
        arc,
        past_topics,
    };
    let topics = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Topics { topics } => Some(topics),
            _ => None,
        },
    )
    .await?;

    let count = topics
        .len()
        .min(profile.social_capacity as usize)
        .min(ctx.options.max_daily_conversations);
    let times = spread_start_times(
        now,
        count,
        ctx.options.day_start_hour,
        ctx.options.day_end_hour,
    );
    let planned: Vec<PlannedConversation> = topics
        .into_iter()
        .zip(times)
        .map(|(topic, scheduled_at)| PlannedConversation {
            topic,
            scheduled_at,
        })
        .collect();

    let topics: Vec<&str> = planned.iter().map(|p| p.topic.as_str()).collect();
    let doc = json!({
        "characterId": me,
        "date": now.date().to_string(),
        "topics": topics,
        "items": planned,
        "started": [],
    });
    ctx.store
        .put(collections::CONVERSATION_PLANS, &plan_key(me, now.date()), doc)
        .await?;

    let count = planned.len();
    state.replace_daily_tasks(planned);
    Ok(count)
}
