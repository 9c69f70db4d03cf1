//! Envelope parser for inbound character messages

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};
use crate::types::conversation::{AgentMessage, ConversationRecord};
use crate::types::envelope::{Envelope, names};
use crate::types::events::FailedAction;

/// Accepted game-time layouts, tried in order
const GAME_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// Inbound message kinds understood by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Liveness ping
    Heartbeat,
    /// Handshake (only meaningful as the first message of a channel)
    ConnectionInit,
    /// Plan request
    OneStep,
    /// Day change in the world
    NewDay,
    /// Action succeeded; optional vitals update
    ActionSucceeded {
        /// Vitals reported with the result
        vitals: Option<Map<String, Value>>,
    },
    /// Action failed and needs a replan
    ActionFailed(FailedAction),
    /// Reflection request
    Reflect,
    /// Current game time
    GameTime(NaiveDateTime),
    /// Observed transcript
    ReadOnly(ConversationRecord),
    /// Conversation turn addressed to the character
    ToAgent(AgentMessage),
}

impl InboundMessage {
    /// Whether the message belongs to the conversation engine
    #[must_use]
    pub fn is_conversation(&self) -> bool {
        matches!(self, Self::GameTime(_) | Self::ReadOnly(_) | Self::ToAgent(_))
    }
}

#[derive(Deserialize)]
struct ActionResultData {
    result: bool,
    #[serde(default)]
    action: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    vitals: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct GameTimeData {
    time: String,
}

/// Parse an envelope into a typed inbound message
///
/// # Arguments
/// * `envelope` - Raw envelope received from the channel
///
/// # Returns
/// The typed message, or a protocol error for unknown names and malformed payloads
///
/// # Errors
/// Returns `SessionError::Protocol` if the message name is unknown or the
/// payload does not match the expected shape
pub fn parse_envelope(envelope: &Envelope) -> Result<InboundMessage> {
    let name = envelope.message_name.as_str();
    let message = match name {
        names::HEARTBEAT => InboundMessage::Heartbeat,
        names::CONNECTION_INIT => InboundMessage::ConnectionInit,
        names::ONESTEP => InboundMessage::OneStep,
        names::NEW_DAY => InboundMessage::NewDay,
        names::REFLECT => InboundMessage::Reflect,
        names::ACTION_RESULT => {
            let data: ActionResultData = decode(name, &envelope.data)?;
            if data.result {
                InboundMessage::ActionSucceeded {
                    vitals: data.vitals,
                }
            } else {
                InboundMessage::ActionFailed(FailedAction {
                    action: data.action,
                    message: data.msg,
                })
            }
        }
        names::GAME_TIME => {
            let data: GameTimeData = decode(name, &envelope.data)?;
            InboundMessage::GameTime(parse_game_time(&data.time)?)
        }
        names::READ_ONLY => InboundMessage::ReadOnly(decode(name, &envelope.data)?),
        names::TO_AGENT => InboundMessage::ToAgent(decode(name, &envelope.data)?),
        other => {
            return Err(SessionError::protocol(format!(
                "unknown message name '{other}'"
            )));
        }
    };
    Ok(message)
}

/// Parse a game-time string in any of the accepted layouts
///
/// # Errors
/// Returns `SessionError::Protocol` if no layout matches
pub fn parse_game_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    GAME_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| SessionError::protocol(format!("unparsable game time '{raw}'")))
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, data: &Value) -> Result<T> {
    serde_json::from_value(data.clone())
        .map_err(|e| SessionError::protocol(format!("malformed '{name}' payload: {e}")))
}
