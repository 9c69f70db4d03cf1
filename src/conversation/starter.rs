//! Starter loop: opens the day's planned conversations in order

use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::context::EngineContext;
use crate::error::Result;
use crate::planner::{Decision, PlanRequest, plan_with_retry};
use crate::store::{Query, collections};
use crate::types::conversation::{AgentMessage, FinishFlags, PlannedConversation};
use crate::types::envelope::{Envelope, MessageCode, names};
use crate::types::identifiers::CharacterId;

use super::state::ConversationState;
use super::{plan_key, relation_key};

/// Recent encounters considered when choosing a partner
const ENCOUNTER_LOOKUP_LIMIT: usize = 20;

/// Profiles considered for the random fallback
const PROFILE_LOOKUP_LIMIT: usize = 100;

/// Format of conversation start times on the wire
const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What happened to a planned item
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum StartOutcome {
    /// Opening line sent
    Started(CharacterId),
    /// No longer needed or nobody to talk to
    Skipped(&'static str),
}

pub(super) async fn run(ctx: EngineContext, state: Arc<ConversationState>) {
    let id = ctx.character_id;
    loop {
        let Some(mut item) = state.peek_daily() else {
            tokio::time::sleep(ctx.options.starter_poll_interval).await;
            continue;
        };
        let Some(now) = state.game_time() else {
            tokio::time::sleep(ctx.options.starter_poll_interval).await;
            continue;
        };
        if item.scheduled_at > now || !ctx.channel.is_attached() {
            tokio::time::sleep(ctx.options.starter_poll_interval).await;
            continue;
        }
        if item.scheduled_at < now {
            state.relabel_head(&item, now);
            item.scheduled_at = now;
        }

        match start_conversation(&ctx, &state, &item).await {
            Ok(StartOutcome::Started(partner)) => {
                log::info!("[char {id}] Started '{}' with {partner}", item.topic);
                state.pop_daily_if(&item);
            }
            Ok(StartOutcome::Skipped(reason)) => {
                log::info!("[char {id}] Skipped '{}': {reason}", item.topic);
                state.pop_daily_if(&item);
            }
            Err(e) if e.is_channel_error() => {
                log::debug!("[char {id}] Start of '{}' deferred: {e}", item.topic);
                tokio::time::sleep(ctx.options.starter_poll_interval).await;
            }
            Err(e) => {
                log::warn!("[char {id}] Start of '{}' dropped: {e}", item.topic);
                state.pop_daily_if(&item);
            }
        }
    }
}

/// Check necessity, pick a partner, send the opening line, persist
pub(super) async fn start_conversation(
    ctx: &EngineContext,
    state: &ConversationState,
    item: &PlannedConversation,
) -> Result<StartOutcome> {
    let me = ctx.character_id;
    let profile = state.profile();

    let request = PlanRequest::ConversationNecessity {
        character: me,
        topic: item.topic.clone(),
        profile: profile.clone(),
    };
    let needed = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Necessity { needed } => Some(needed),
            _ => None,
        },
    )
    .await?;
    if !needed {
        return Ok(StartOutcome::Skipped("no longer needed"));
    }

    let Some(partner) = select_partner(ctx, state).await? else {
        return Ok(StartOutcome::Skipped("no partner available"));
    };

    let impression = ctx
        .store
        .get(collections::IMPRESSIONS, &relation_key(me, partner))
        .await?;
    let request = PlanRequest::Opening {
        character: me,
        partner,
        topic: item.topic.clone(),
        profile,
        impression,
    };
    let content = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Utterance { content } => Some(content),
            _ => None,
        },
    )
    .await?;

    let opening = AgentMessage {
        from: me,
        to: partner,
        content,
        start_time: item.scheduled_at.format(START_TIME_FORMAT).to_string(),
        finish_flags: FinishFlags::empty(),
    };
    ctx.channel
        .send(Envelope::new(
            me,
            MessageCode::Conversation,
            names::TO_AGENT,
            serde_json::to_value(&opening)?,
        ))
        .await?;
    state.mark_contacted(partner);

    ctx.store
        .append(
            collections::MESSAGES,
            json!({
                "characterId": me,
                "pairKey": CharacterId::pair_key(me, partner),
                "from": opening.from,
                "to": opening.to,
                "content": opening.content,
                "startTime": opening.start_time,
                "finishFlags": opening.finish_flags,
                "topic": item.topic,
            }),
        )
        .await?;
    mark_started(ctx, item, partner).await?;

    Ok(StartOutcome::Started(partner))
}

/// Most recently met partner not yet contacted today, else a random known character
async fn select_partner(
    ctx: &EngineContext,
    state: &ConversationState,
) -> Result<Option<CharacterId>> {
    let me = ctx.character_id;
    let encounters = ctx
        .store
        .query(
            collections::ENCOUNTERS,
            &Query::all()
                .eq("characterId", me.get())
                .newest_first()
                .limit(ENCOUNTER_LOOKUP_LIMIT),
        )
        .await?;
    let recent = encounters
        .iter()
        .filter_map(|doc| character_field(doc, "partner"))
        .find(|partner| *partner != me && !state.was_contacted(*partner));
    if recent.is_some() {
        return Ok(recent);
    }

    let profiles = ctx
        .store
        .list(collections::PROFILES, PROFILE_LOOKUP_LIMIT)
        .await?;
    let candidates: Vec<CharacterId> = profiles
        .iter()
        .filter_map(|doc| character_field(doc, "id"))
        .filter(|id| *id != me)
        .collect();
    let fresh: Vec<CharacterId> = candidates
        .iter()
        .copied()
        .filter(|id| !state.was_contacted(*id))
        .collect();
    let pool = if fresh.is_empty() { &candidates } else { &fresh };
    Ok(pool.choose(&mut rand::thread_rng()).copied())
}

fn character_field(doc: &Value, field: &str) -> Option<CharacterId> {
    doc.get(field).and_then(Value::as_i64).map(CharacterId::new)
}

/// Add the started item to today's stored plan
async fn mark_started(
    ctx: &EngineContext,
    item: &PlannedConversation,
    partner: CharacterId,
) -> Result<()> {
    let key = plan_key(ctx.character_id, item.scheduled_at.date());
    let Some(mut plan) = ctx.store.get(collections::CONVERSATION_PLANS, &key).await? else {
        return Ok(());
    };
    let entry = json!({
        "topic": item.topic,
        "partner": partner,
        "startedAt": started_at(item.scheduled_at),
    });
    if let Some(started) = plan.get_mut("started").and_then(Value::as_array_mut) {
        started.push(entry);
    } else if let Some(obj) = plan.as_object_mut() {
        obj.insert("started".to_string(), Value::Array(vec![entry]));
    }
    ctx.store
        .put(collections::CONVERSATION_PLANS, &key, plan)
        .await
}

fn started_at(time: NaiveDateTime) -> String {
    time.format(START_TIME_FORMAT).to_string()
}
