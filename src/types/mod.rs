//! Type definitions for the session engine
//!
//! This module contains the type definitions shared across the engine,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`CharacterId`)
//! - [`envelope`] - Wire envelope and message codes
//! - [`events`] - Workflow events and failed-action payloads
//! - [`conversation`] - Conversation records, inbound agent messages, daily plan items
//! - [`options`] - Engine configuration options
//! - [`profile`] - Character profile snapshot

pub mod conversation;
pub mod envelope;
pub mod events;
pub mod identifiers;
pub mod options;
pub mod profile;

// Re-export commonly used types
pub use conversation::{
    AgentMessage, ConversationRecord, ConversationTurn, FinishFlags, PlannedConversation,
};
pub use envelope::{Envelope, MessageCode};
pub use events::{FailedAction, WorkflowEvent};
pub use identifiers::CharacterId;
pub use options::{EngineOptions, EngineOptionsBuilder};
pub use profile::{Profile, Vitals};
