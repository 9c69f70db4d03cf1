//! Periodic reconciliation of observed conversations

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::EngineContext;
use crate::error::Result;
use crate::planner::{Decision, PlanRequest, plan_with_retry};
use crate::store::collections;
use crate::types::conversation::ConversationRecord;
use crate::types::identifiers::CharacterId;

use super::relation_key;
use super::state::ConversationState;

pub(super) async fn run(ctx: EngineContext, state: Arc<ConversationState>) {
    let period = ctx.options.reconcile_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        reconcile_once(&ctx, &state).await;
    }
}

/// Persist every pending transcript and update the pair relations
///
/// Returns the number of transcripts drained.
pub(super) async fn reconcile_once(ctx: &EngineContext, state: &ConversationState) -> usize {
    let records = state.drain_ongoing();
    if records.is_empty() {
        return 0;
    }
    log::info!(
        "[char {}] Reconciling {} conversations",
        ctx.character_id,
        records.len()
    );

    for record in &records {
        if let Err(e) = reconcile_record(ctx, record).await {
            log::warn!(
                "[char {}] Reconciliation of {}/{} failed: {e}",
                ctx.character_id,
                record.key().0,
                record.start_time
            );
        }
    }
    records.len()
}

async fn reconcile_record(ctx: &EngineContext, record: &ConversationRecord) -> Result<()> {
    let me = ctx.character_id;
    let partner = record.partner_of(me);
    let (pair_key, start_time) = record.key();

    ctx.store
        .append(
            collections::CONVERSATIONS,
            json!({
                "characterId": me,
                "pairKey": pair_key,
                "participants": record.participants,
                "startTime": start_time,
                "messages": record.messages,
            }),
        )
        .await?;
    ctx.store
        .append(
            collections::ENCOUNTERS,
            json!({ "characterId": me, "partner": partner, "startTime": record.start_time }),
        )
        .await?;

    let (impression, intimacy) = tokio::join!(
        update_impression(ctx, partner, record),
        update_intimacy(ctx, partner, record)
    );
    impression?;
    intimacy
}

async fn update_impression(
    ctx: &EngineContext,
    partner: CharacterId,
    record: &ConversationRecord,
) -> Result<()> {
    let request = PlanRequest::Impression {
        character: ctx.character_id,
        partner,
        record: record.clone(),
    };
    let summary = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Impression { summary } => Some(summary),
            _ => None,
        },
    )
    .await?;

    ctx.store
        .put(
            collections::IMPRESSIONS,
            &relation_key(ctx.character_id, partner),
            json!({
                "characterId": ctx.character_id,
                "partner": partner,
                "summary": summary,
                "updatedAt": Utc::now().to_rfc3339(),
            }),
        )
        .await
}

async fn update_intimacy(
    ctx: &EngineContext,
    partner: CharacterId,
    record: &ConversationRecord,
) -> Result<()> {
    let request = PlanRequest::Intimacy {
        character: ctx.character_id,
        partner,
        record: record.clone(),
    };
    let level = plan_with_retry(
        ctx.planner.as_ref(),
        &request,
        ctx.options.planner_attempts,
        |d| match d {
            Decision::Intimacy { level } => Some(level),
            _ => None,
        },
    )
    .await?;

    ctx.store
        .put(
            collections::INTIMACY,
            &relation_key(ctx.character_id, partner),
            json!({
                "characterId": ctx.character_id,
                "partner": partner,
                "level": level,
                "updatedAt": Utc::now().to_rfc3339(),
            }),
        )
        .await
}
