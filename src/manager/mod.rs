//! Character session management
//!
//! Provides `SessionManager` for activating, demoting, routing to and
//! purging character sessions, with heartbeat-based failure detection and
//! bounded cleanup of hosted sessions.
//!
//! # Module Structure
//!
//! - `session_manager` - Core `SessionManager` with public API
//! - `session` - Per-character session (channel + both engines)
//! - `reaper` - Deferred cancellation of hosted sessions' tasks
//! - `background` - Heartbeat scanner and lifecycle listener tasks
//! - `status` - Read-only status snapshots

mod background;
mod reaper;
mod session;
mod session_manager;
mod status;

pub use reaper::OrphanReaper;
pub use session::Session;
pub use session_manager::{Activation, SessionManager};
pub use status::{SessionState, SessionStatus};
