//! Reply worker routine
//!
//! Answers waiting turns one at a time. The head of the queue is only removed
//! once it has been answered or definitively dropped; while the session's
//! channel is detached it stays in place.

use serde_json::json;
use std::sync::Arc;

use crate::context::EngineContext;
use crate::error::Result;
use crate::planner::{Decision, PlanRequest, plan_with_retry};
use crate::store::{Query, collections};
use crate::types::conversation::AgentMessage;
use crate::types::envelope::{Envelope, MessageCode, names};
use crate::types::identifiers::CharacterId;

use super::relation_key;
use super::state::ConversationState;

/// Past conversations with the partner handed to the planner
const HISTORY_LIMIT: usize = 5;

pub(super) async fn run(ctx: EngineContext, state: Arc<ConversationState>) {
    let id = ctx.character_id;
    loop {
        if !ctx.channel.is_attached() {
            tokio::time::sleep(ctx.options.reply_poll_interval).await;
            continue;
        }
        let Some(incoming) = state.peek_waiting() else {
            tokio::time::sleep(ctx.options.reply_poll_interval).await;
            continue;
        };

        match reply_to(&ctx, &state, &incoming).await {
            Ok(()) => {
                state.pop_waiting();
            }
            Err(e) if e.is_channel_error() => {
                log::debug!("[char {id}] Reply to {} deferred: {e}", incoming.from);
                tokio::time::sleep(ctx.options.reply_poll_interval).await;
            }
            Err(e) => {
                log::warn!("[char {id}] Reply to {} dropped: {e}", incoming.from);
                state.pop_waiting();
            }
        }
    }
}

async fn reply_to(
    ctx: &EngineContext,
    state: &ConversationState,
    incoming: &AgentMessage,
) -> Result<()> {
    let me = ctx.character_id;
    let partner = incoming.from;

    let impression = ctx
        .store
        .get(collections::IMPRESSIONS, &relation_key(me, partner))
        .await?;
    let history_query = Query::all()
        .eq("pairKey", CharacterId::pair_key(me, partner))
        .newest_first()
        .limit(HISTORY_LIMIT);
    let history = ctx
        .store
        .query(collections::CONVERSATIONS, &history_query)
        .await?;

    let request = PlanRequest::Reply {
        character: me,
        profile: state.profile(),
        impression,
        history,
        incoming: incoming.clone(),
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

    let mut finish_flags = incoming.finish_flags;
    finish_flags.flip_first_unset();
    let reply = AgentMessage {
        from: me,
        to: partner,
        content,
        start_time: incoming.start_time.clone(),
        finish_flags,
    };

    let data = serde_json::to_value(&reply)?;
    ctx.channel
        .send(Envelope::new(
            me,
            MessageCode::Conversation,
            names::TO_AGENT,
            data.clone(),
        ))
        .await?;

    let mut doc = json!({ "characterId": me, "pairKey": CharacterId::pair_key(me, partner) });
    if let (Some(doc), Some(data)) = (doc.as_object_mut(), data.as_object()) {
        doc.extend(data.clone());
    }
    ctx.store.append(collections::MESSAGES, doc).await
}
