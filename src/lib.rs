//! # Character Session Engine
//!
//! Session concurrency and lifecycle engine for long-lived simulated
//! characters. Each character connects over a persistent duplex channel; the
//! engine keeps at most one active session per character, detects silent
//! peers through heartbeats, parks disconnected sessions for a grace period
//! and drives two engines per character:
//!
//! - a **workflow engine**, an event-routed state machine that plans
//!   objectives and action lists, replans after failed actions, hunts for
//!   jobs and reflects, one event at a time
//! - a **conversation engine**, five cooperating routines that classify
//!   inbound conversation traffic, reply, reconcile transcripts, plan the
//!   day's conversations and start them in order
//!
//! Decisions come from an external [`Planner`]; durable documents live in a
//! [`Store`]. Both are traits so they can be swapped for HTTP clients
//! (feature `http`) or in-process fakes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use character_session_engine::{EngineOptions, MemoryStore, planner_fn, start_server};
//! use character_session_engine::planner::Decision;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let planner = planner_fn(|_request| async {
//!         Ok(Decision::ActionSequence { commands: vec!["rest".into()] })
//!     });
//!     let options = EngineOptions::builder().build();
//!     let handle = start_server(options, planner, Arc::new(MemoryStore::new())).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`]: identifiers, envelope, events, conversation records, options
//! - [`message`]: typed parse of inbound envelopes
//! - [`planner`] / [`store`]: external collaborators and their helpers
//! - [`transport`]: channel abstraction, in-memory pair, WebSocket listener
//! - [`heartbeat`]: last-seen registry
//! - [`manager`]: session manager, orphan reaper, background lifecycle tasks
//! - [`workflow`] / [`conversation`]: the two per-character engines
//! - [`server`]: handshake and inbound message loop
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod conversation;
pub mod error;
pub mod heartbeat;
#[cfg(feature = "http")]
pub mod http;
pub mod manager;
pub mod message;
pub mod planner;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;
pub mod workflow;

// Re-export commonly used types for external API
pub use conversation::{ConversationEngine, ConversationState};
pub use error::{Result, SessionError};
pub use heartbeat::{HeartbeatRecord, HeartbeatRegistry};
pub use manager::{Activation, OrphanReaper, Session, SessionManager, SessionState, SessionStatus};
pub use message::{InboundMessage, parse_envelope};
pub use planner::{Decision, PlanRequest, Planner, planner_fn};
pub use server::serve_connection;
pub use store::{MemoryStore, Query, Store, TimedStore};
pub use transport::{Channel, Connection, MemoryChannel, MemoryPeer, SessionChannel};
pub use types::{CharacterId, EngineOptions, EngineOptionsBuilder, Envelope, WorkflowEvent};
pub use workflow::{RunningState, WorkflowEngine, WorkflowNode};

/// Version of the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// EMBEDDED SERVER FUNCTION
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a running WebSocket server
pub struct ServerHandle {
    manager: SessionManager,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
    listener: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Session manager behind the server
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and shut the manager down
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        match self.listener.await {
            Ok(Err(e)) => log::warn!("Listener ended with error: {e}"),
            Err(e) => log::warn!("Listener task failed: {e}"),
            Ok(Ok(())) => {}
        }
        self.manager.shutdown().await;
    }
}

/// Start the WebSocket server on `options.bind_addr`
///
/// This function is non-blocking; the server runs in background tasks.
///
/// # Arguments
/// * `options` - Engine options (bind address and TLS material included)
/// * `planner` - Decision collaborator
/// * `store` - Document store
///
/// # Errors
/// Returns error if binding fails or the TLS material cannot be loaded
pub async fn start_server(
    options: EngineOptions,
    planner: Arc<dyn Planner>,
    store: Arc<dyn Store>,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(options.bind_addr).await?;
    start_server_with_listener(listener, options, planner, store).await
}

/// Start the WebSocket server on a pre-bound listener
///
/// # Errors
/// Returns error if the TLS material cannot be loaded
pub async fn start_server_with_listener(
    listener: TcpListener,
    options: EngineOptions,
    planner: Arc<dyn Planner>,
    store: Arc<dyn Store>,
) -> Result<ServerHandle> {
    options.validate()?;
    let tls = match (&options.tls_cert, &options.tls_key) {
        (Some(cert), Some(key)) => Some(transport::websocket::load_tls_acceptor(cert, key)?),
        _ => None,
    };

    let local_addr = listener.local_addr()?;
    let manager = SessionManager::new(planner, store, options)?;
    let shutdown = CancellationToken::new();
    let listener = tokio::spawn(transport::websocket::serve(
        listener,
        tls,
        manager.clone(),
        shutdown.clone(),
    ));

    Ok(ServerHandle {
        manager,
        shutdown,
        local_addr,
        listener,
    })
}
