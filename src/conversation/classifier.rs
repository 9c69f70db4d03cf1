//! Inbound classifier routine

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::message::InboundMessage;
use crate::types::identifiers::CharacterId;

use super::state::ConversationState;

/// Drain the inbound queue, sorting each message into the shared state
pub(super) async fn run(
    state: Arc<ConversationState>,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
) {
    let id = state.character_id();
    while let Some(message) = inbound_rx.recv().await {
        classify(id, &state, message);
    }
    log::debug!("[char {id}] Conversation inbound queue closed");
}

fn classify(id: CharacterId, state: &ConversationState, message: InboundMessage) {
    match message {
        InboundMessage::GameTime(time) => {
            if state.observe_game_time(time) {
                log::info!("[char {id}] New game day {}, daily planning triggered", time.date());
            }
        }
        InboundMessage::ReadOnly(record) => {
            log::debug!(
                "[char {id}] Observed conversation {}/{}",
                record.key().0,
                record.start_time
            );
            state.upsert_ongoing(record);
        }
        InboundMessage::ToAgent(message) => {
            if message.finish_flags.is_complete() {
                state.record_completed_turn(message);
            } else {
                state.push_waiting(message);
            }
        }
        other => {
            log::warn!("[char {id}] Conversation engine dropped {other:?}");
        }
    }
}
