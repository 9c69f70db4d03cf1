//! Inbound message parsing
//!
//! Turns a raw [`Envelope`](crate::types::Envelope) into a closed
//! [`InboundMessage`] variant. Unknown message names are protocol errors.

mod parser;

pub use parser::{InboundMessage, parse_envelope, parse_game_time};
