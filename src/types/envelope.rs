//! Wire envelope shared by both directions of a character channel

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::identifiers::CharacterId;

// ============================================================================
// Message names
// ============================================================================

/// Reserved message names consumed or emitted by the engine
pub mod names {
    /// Liveness ping, answered with `{status: "ok"}`
    pub const HEARTBEAT: &str = "heartbeat";
    /// First message on a new channel
    pub const CONNECTION_INIT: &str = "connectionInit";
    /// Request for a fresh plan
    pub const ONESTEP: &str = "onestep";
    /// Day change in the world; triggers job hunting
    pub const NEW_DAY: &str = "new_day";
    /// Outcome of a previously issued action
    pub const ACTION_RESULT: &str = "actionresult";
    /// Request for a reflection pass
    pub const REFLECT: &str = "reflect";
    /// Current in-game time
    pub const GAME_TIME: &str = "gameTime";
    /// Conversation transcript observed by the character
    pub const READ_ONLY: &str = "read_only";
    /// Conversation turn addressed to the character (and emitted by it)
    pub const TO_AGENT: &str = "to_agent";
    /// Planned action sequence
    pub const ACTION_LIST: &str = "actionList";
    /// Job application
    pub const CV_SUBMISSION: &str = "cv_submission";
    /// Hiring decisions
    pub const MAYOR_DECISION: &str = "mayor_decision";
}

/// Numeric codes carried in `messageCode`
///
/// Inbound routing is keyed on `messageName`; codes are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageCode {
    /// Heartbeat request/response
    Heartbeat = 0,
    /// Connection handshake
    ConnectionInit = 1,
    /// Action list emitted by the workflow
    ActionList = 6,
    /// Job application
    CvSubmission = 7,
    /// Hiring decision
    MayorDecision = 8,
    /// Conversation turn
    Conversation = 9,
}

impl MessageCode {
    /// Raw wire value
    #[must_use]
    pub const fn value(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Message envelope `{characterId, messageCode, messageName, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Owning character; optional on the wire so the handshake can reject it
    #[serde(default)]
    pub character_id: Option<CharacterId>,
    /// Numeric message code
    #[serde(default)]
    pub message_code: i32,
    /// Message name used for routing
    pub message_name: String,
    /// Message payload
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    json!({})
}

impl Envelope {
    /// Create an outbound envelope for a character
    pub fn new(
        character_id: CharacterId,
        code: MessageCode,
        name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            character_id: Some(character_id),
            message_code: code.value(),
            message_name: name.into(),
            data,
        }
    }

    /// Handshake acknowledgement `{result, msg}`
    pub fn ack(character_id: Option<CharacterId>, result: bool, msg: impl Into<String>) -> Self {
        Self {
            character_id,
            message_code: MessageCode::ConnectionInit.value(),
            message_name: names::CONNECTION_INIT.to_string(),
            data: json!({ "result": result, "msg": msg.into() }),
        }
    }

    /// Heartbeat reply `{status: "ok"}`
    #[must_use]
    pub fn heartbeat_ok(character_id: CharacterId) -> Self {
        Self::new(
            character_id,
            MessageCode::Heartbeat,
            names::HEARTBEAT,
            json!({ "status": "ok" }),
        )
    }

    /// Action list `{command: [...]}`
    #[must_use]
    pub fn action_list(character_id: CharacterId, commands: &[String]) -> Self {
        Self::new(
            character_id,
            MessageCode::ActionList,
            names::ACTION_LIST,
            json!({ "command": commands }),
        )
    }

    /// Serialize to a JSON text frame
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
