//! Error types for the character session engine

use thiserror::Error;

use crate::types::identifiers::CharacterId;

/// Main error type for the session engine
///
/// Action failures reported by the game world are not errors; they travel as
/// [`FailedAction`](crate::types::events::FailedAction) data and trigger a replan.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Malformed inbound envelope or unknown message kind
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Planner call failed or returned a decision of the wrong shape
    #[error("Planner failure after {attempts} attempt(s): {message}")]
    PlannerFailure {
        /// Error message from the last attempt
        message: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// The peer side of the channel is closed or broken
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The session has no attached channel (hosted)
    #[error("Channel detached for character {0}")]
    ChannelDetached(CharacterId),

    /// Unhandled failure inside a workflow node; terminates the session
    #[error("Fatal node error: {0}")]
    Fatal(String),

    /// Activation refused because the character already has an active session
    #[error("character ID is active")]
    AlreadyActive(CharacterId),

    /// No session is indexed for the character
    #[error("Session not found for character {0}")]
    SessionNotFound(CharacterId),

    /// The session was terminated by a fatal node error and awaits purge
    #[error("Session for character {0} is terminated")]
    SessionTerminated(CharacterId),

    /// Store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// External call exceeded its request timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for session engine operations
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a planner failure
    pub fn planner_failure(msg: impl Into<String>, attempts: u32) -> Self {
        Self::PlannerFailure {
            message: msg.into(),
            attempts,
        }
    }

    /// Create a channel closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }

    /// Create a fatal node error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the owning routine handles this error locally and carries on
    ///
    /// Protocol errors, planner failures and channel errors never escape the
    /// routine that hit them. Everything else inside a workflow node is fatal
    /// to the session.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::PlannerFailure { .. }
                | Self::ChannelClosed(_)
                | Self::ChannelDetached(_)
        )
    }

    /// Whether this error means the outbound channel can no longer be used
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Self::ChannelClosed(_) | Self::ChannelDetached(_))
    }
}
