//! Session manager for concurrent character sessions
//!
//! Owns the active and hosted session maps. Both maps sit behind one lock
//! that is only held for the map operation itself, never across an await,
//! so no caller can observe an id in both maps.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::error::{Result, SessionError};
use crate::heartbeat::HeartbeatRegistry;
use crate::message::{InboundMessage, parse_envelope};
use crate::planner::Planner;
use crate::store::{Store, TimedStore};
use crate::transport::{Channel, ChannelFault, SessionChannel};
use crate::types::envelope::Envelope;
use crate::types::identifiers::CharacterId;
use crate::types::options::EngineOptions;

use super::background::{spawn_heartbeat_scanner, spawn_lifecycle_listener};
use super::reaper::OrphanReaper;
use super::session::Session;
use super::status::{SessionState, SessionStatus};

// ============================================================================
// ACTIVATION
// ============================================================================

/// Result of a successful activation
#[derive(Clone)]
pub struct Activation {
    /// The activated session
    pub session: Arc<Session>,
    /// Generation of the channel attached by this activation
    pub generation: u64,
    /// Grace time that was left when a hosted session was resumed
    pub resumed_grace: Option<Duration>,
}

impl Activation {
    /// Whether a hosted session was resumed rather than created
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed_grace.is_some()
    }
}

#[derive(Default)]
struct Registry {
    active: HashMap<CharacterId, Arc<Session>>,
    hosted: HashMap<CharacterId, Arc<Session>>,
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

pub(super) struct ManagerInner {
    registry: Mutex<Registry>,
    pub(super) heartbeats: HeartbeatRegistry,
    pub(super) reaper: OrphanReaper,
    planner: Arc<dyn Planner>,
    store: Arc<dyn Store>,
    pub(super) options: Arc<EngineOptions>,
    faults_tx: mpsc::UnboundedSender<ChannelFault>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Registry of character sessions
///
/// The `SessionManager` coordinates:
/// - Activation with at most one active session per character
/// - Demotion to hosted state with a grace-period purge
/// - Heartbeat-based failure detection
/// - Routing of inbound messages to each session's engines
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    pub(super) inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Create a manager and start its background tasks
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `planner` - Decision collaborator shared by every session
    /// * `store` - Document store; wrapped with the configured request timeout
    /// * `options` - Engine options
    ///
    /// # Errors
    /// Returns `SessionError::InvalidConfig` if the options fail validation
    pub fn new(
        planner: Arc<dyn Planner>,
        store: Arc<dyn Store>,
        options: EngineOptions,
    ) -> Result<Self> {
        options.validate()?;
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let (reaper, expired_rx) = OrphanReaper::new();
        let store: Arc<dyn Store> = Arc::new(TimedStore::new(store, options.store_timeout));

        let inner = Arc::new(ManagerInner {
            registry: Mutex::new(Registry::default()),
            heartbeats: HeartbeatRegistry::new(),
            reaper,
            planner,
            store,
            options: Arc::new(options),
            faults_tx,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let scanner = spawn_heartbeat_scanner(Weak::clone(&weak), inner.shutdown.clone());
        let listener =
            spawn_lifecycle_listener(weak, faults_rx, expired_rx, inner.shutdown.clone());
        inner.background.lock().extend([scanner, listener]);

        log::info!(
            "SessionManager started (heartbeat timeout {:?}, grace period {:?})",
            inner.options.heartbeat_timeout,
            inner.options.grace_period
        );
        Ok(Self { inner })
    }

    pub(super) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Engine options
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// Heartbeat registry
    #[must_use]
    pub fn heartbeats(&self) -> &HeartbeatRegistry {
        &self.inner.heartbeats
    }

    /// Orphan reaper
    #[must_use]
    pub fn reaper(&self) -> &OrphanReaper {
        &self.inner.reaper
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bind a live channel to a character
    ///
    /// Resumes a hosted session (keeping its tasks and queues) or creates a
    /// new one. A hosted session that was terminated, or whose tasks were
    /// already reaped, is purged and replaced.
    ///
    /// # Errors
    /// Returns `SessionError::AlreadyActive` if the character already has an
    /// active session
    pub fn activate(&self, id: CharacterId, channel: Arc<dyn Channel>) -> Result<Activation> {
        let mut registry = self.inner.registry.lock();
        if registry.active.contains_key(&id) {
            log::warn!("[char {id}] Activation rejected, already active");
            return Err(SessionError::AlreadyActive(id));
        }

        if let Some(session) = registry.hosted.get(&id).cloned() {
            let reaped = !self.inner.reaper.is_pending(id) || session.tasks_finished();
            if !session.is_terminated() && !reaped {
                let activation = self.unhost_locked(&mut registry, session, channel);
                drop(registry);
                self.inner.heartbeats.register(id);
                return Ok(activation);
            }
            registry.hosted.remove(&id);
            self.inner.reaper.purge(id);
            session.abort_tasks();
            if reaped {
                log::info!("[char {id}] Replacing hosted session whose tasks were reaped");
            } else {
                log::info!("[char {id}] Replacing terminated hosted session");
            }
        }

        let session_channel = Arc::new(SessionChannel::new(
            id,
            channel,
            self.inner.faults_tx.clone(),
        ));
        let ctx = EngineContext {
            character_id: id,
            planner: Arc::clone(&self.inner.planner),
            store: Arc::clone(&self.inner.store),
            options: Arc::clone(&self.inner.options),
            channel: session_channel,
        };
        let session = Arc::new(Session::spawn(ctx));
        let generation = session.channel().generation().unwrap_or(1);
        registry.active.insert(id, Arc::clone(&session));
        drop(registry);

        self.inner.heartbeats.register(id);
        log::info!("[char {id}] Activated");
        Ok(Activation {
            session,
            generation,
            resumed_grace: None,
        })
    }

    /// Move a hosted session back to active on a new channel
    ///
    /// # Errors
    /// Returns `SessionError::SessionNotFound` if the character is not hosted
    pub fn unhost(&self, id: CharacterId, channel: Arc<dyn Channel>) -> Result<Activation> {
        let mut registry = self.inner.registry.lock();
        let session = registry
            .hosted
            .get(&id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(id))?;
        let activation = self.unhost_locked(&mut registry, session, channel);
        drop(registry);
        self.inner.heartbeats.register(id);
        Ok(activation)
    }

    fn unhost_locked(
        &self,
        registry: &mut Registry,
        session: Arc<Session>,
        channel: Arc<dyn Channel>,
    ) -> Activation {
        let id = session.id();
        registry.hosted.remove(&id);
        let remaining = self
            .inner
            .reaper
            .cancel(id)
            .map_or(Duration::ZERO, |(_, remaining)| remaining);
        let generation = session.channel().attach(channel);
        registry.active.insert(id, Arc::clone(&session));

        log::info!("[char {id}] Unhosted with {remaining:?} of grace left");
        Activation {
            session,
            generation,
            resumed_grace: Some(remaining),
        }
    }

    /// Undo an activation whose handshake could not be completed
    ///
    /// A fresh session is purged. A resumed session goes back to hosted with
    /// the grace it had left, extended by one heartbeat timeout.
    pub fn abort_activation(&self, activation: &Activation) {
        let id = activation.session.id();
        match activation.resumed_grace {
            None => {
                if self.is_current(id, activation.generation) {
                    self.purge(id);
                }
            }
            Some(remaining) => {
                if self.demote_matching(id, Some(activation.generation), remaining) {
                    self.inner
                        .reaper
                        .extend(id, self.inner.options.heartbeat_timeout);
                }
            }
        }
    }

    /// Move an active session to hosted and schedule its purge
    ///
    /// The session's tasks keep running against the detached channel.
    /// Returns `false` if the character was not active.
    pub fn demote(&self, id: CharacterId) -> bool {
        self.demote_matching(id, None, self.inner.options.grace_period)
    }

    /// Demote only if the channel generation still matches
    ///
    /// Used for end-of-stream and send failures, which may refer to a channel
    /// that has since been replaced.
    pub fn disconnect(&self, id: CharacterId, generation: u64) -> bool {
        self.demote_matching(id, Some(generation), self.inner.options.grace_period)
    }

    fn demote_matching(&self, id: CharacterId, generation: Option<u64>, grace: Duration) -> bool {
        let session = {
            let mut registry = self.inner.registry.lock();
            let Some(session) = registry.active.get(&id) else {
                return false;
            };
            if let Some(generation) = generation
                && session.channel().generation() != Some(generation)
            {
                log::debug!("[char {id}] Ignoring stale disconnect of generation {generation}");
                return false;
            }
            let Some(session) = registry.active.remove(&id) else {
                return false;
            };
            registry.hosted.insert(id, Arc::clone(&session));
            // A hosted entry always has a pending purge until the reaper takes it
            self.inner.reaper.schedule(id, session.task_handles(), grace);
            session
        };

        close_detached(session.channel());
        log::info!("[char {id}] Demoted to hosted for {grace:?}");
        true
    }

    /// Remove every trace of a character's session
    ///
    /// Idempotent. Returns `true` if a session was removed.
    pub fn purge(&self, id: CharacterId) -> bool {
        let removed = {
            let mut registry = self.inner.registry.lock();
            registry
                .active
                .remove(&id)
                .or_else(|| registry.hosted.remove(&id))
        };
        self.inner.reaper.purge(id);
        self.inner.heartbeats.remove(id);

        match removed {
            Some(session) => {
                session.abort_tasks();
                close_detached(session.channel());
                log::info!("[char {id}] Purged");
                true
            }
            None => false,
        }
    }

    /// Drop the hosted entry of a character whose grace period elapsed
    ///
    /// A hosted entry with a pending purge belongs to a later demotion and
    /// is left alone.
    pub(super) fn expire(&self, id: CharacterId) {
        let removed = {
            let mut registry = self.inner.registry.lock();
            if self.inner.reaper.is_pending(id) {
                None
            } else {
                registry.hosted.remove(&id)
            }
        };
        if let Some(session) = removed {
            self.inner.heartbeats.remove(id);
            session.abort_tasks();
            log::info!("[char {id}] Hosted session expired");
        }
    }

    /// Demote every active character the heartbeat scan reports as silent
    ///
    /// Returns the demoted ids.
    pub fn apply_heartbeat_scan(&self) -> Vec<CharacterId> {
        let silent: Vec<CharacterId> = self
            .inner
            .heartbeats
            .scan(self.inner.options.heartbeat_timeout)
            .into_iter()
            .filter(|id| self.has(*id))
            .collect();
        if silent.is_empty() {
            return silent;
        }
        self.inner.heartbeats.mark_missed(&silent);

        silent
            .into_iter()
            .filter(|id| {
                let demoted = self.demote(*id);
                if demoted {
                    log::warn!("[char {id}] Heartbeat timed out");
                }
                demoted
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Active session of a character
    #[must_use]
    pub fn get(&self, id: CharacterId) -> Option<Arc<Session>> {
        self.inner.registry.lock().active.get(&id).cloned()
    }

    /// Hosted session of a character
    #[must_use]
    pub fn get_hosted(&self, id: CharacterId) -> Option<Arc<Session>> {
        self.inner.registry.lock().hosted.get(&id).cloned()
    }

    /// Whether the character has an active session
    #[must_use]
    pub fn has(&self, id: CharacterId) -> bool {
        self.inner.registry.lock().active.contains_key(&id)
    }

    /// Whether the character has a hosted session
    #[must_use]
    pub fn has_hosted(&self, id: CharacterId) -> bool {
        self.inner.registry.lock().hosted.contains_key(&id)
    }

    /// Number of active sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.registry.lock().active.len()
    }

    /// Number of hosted sessions
    #[must_use]
    pub fn hosted_count(&self) -> usize {
        self.inner.registry.lock().hosted.len()
    }

    /// Whether the character is active on the channel of `generation`
    #[must_use]
    pub fn is_current(&self, id: CharacterId, generation: u64) -> bool {
        self.get(id)
            .is_some_and(|s| s.channel().generation() == Some(generation))
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Record a heartbeat and answer it
    ///
    /// # Errors
    /// Returns `SessionError::SessionNotFound` if the character is not active,
    /// or the channel error if the reply could not be sent
    pub async fn handle_heartbeat(&self, id: CharacterId) -> Result<()> {
        let session = self.get(id).ok_or(SessionError::SessionNotFound(id))?;
        self.inner.heartbeats.touch(id);
        session.channel().send(Envelope::heartbeat_ok(id)).await
    }

    /// Parse an inbound envelope and route it to the character's session
    ///
    /// Heartbeats are answered here; everything else goes to the session's
    /// engines.
    ///
    /// # Errors
    /// Returns `SessionError::Protocol` for malformed or unknown messages,
    /// `SessionError::SessionNotFound` if the character is not active and
    /// `SessionError::SessionTerminated` if its session was terminated
    pub async fn route_message(&self, id: CharacterId, envelope: &Envelope) -> Result<()> {
        match parse_envelope(envelope)? {
            InboundMessage::Heartbeat => self.handle_heartbeat(id).await,
            message => {
                let session = self.get(id).ok_or(SessionError::SessionNotFound(id))?;
                session.route(message)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Status snapshot of one character's session
    #[must_use]
    pub fn status(&self, id: CharacterId) -> Option<SessionStatus> {
        let (session, state) = {
            let registry = self.inner.registry.lock();
            if let Some(s) = registry.active.get(&id) {
                (Arc::clone(s), SessionState::Active)
            } else {
                (Arc::clone(registry.hosted.get(&id)?), SessionState::Hosted)
            }
        };
        Some(self.snapshot(&session, state))
    }

    /// Status snapshots of every session, ordered by character id
    #[must_use]
    pub fn list_status(&self) -> Vec<SessionStatus> {
        let sessions: Vec<(Arc<Session>, SessionState)> = {
            let registry = self.inner.registry.lock();
            registry
                .active
                .values()
                .map(|s| (Arc::clone(s), SessionState::Active))
                .chain(
                    registry
                        .hosted
                        .values()
                        .map(|s| (Arc::clone(s), SessionState::Hosted)),
                )
                .collect()
        };
        let mut statuses: Vec<SessionStatus> = sessions
            .iter()
            .map(|(s, state)| self.snapshot(s, *state))
            .collect();
        statuses.sort_by_key(|s| s.character_id);
        statuses
    }

    fn snapshot(&self, session: &Session, state: SessionState) -> SessionStatus {
        let id = session.id();
        let heartbeat = self.inner.heartbeats.record(id);
        let conversation = session.conversation().state();
        SessionStatus {
            character_id: id,
            state,
            created_at: session.created_at(),
            last_heartbeat: heartbeat.as_ref().map(|r| r.last_seen_wall),
            heartbeat_count: heartbeat.as_ref().map_or(0, |r| r.beat_count),
            missed_count: heartbeat.as_ref().map_or(0, |r| r.missed_count),
            purge_remaining_secs: self.inner.reaper.remaining(id).map(|d| d.as_secs()),
            terminated: session.is_terminated(),
            current_node: session.workflow().current_node(),
            waiting_responses: conversation.waiting_responses().len(),
            daily_tasks: conversation.daily_tasks().len(),
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Gracefully shut down the manager
    ///
    /// Stops the background tasks, cancels every session's tasks and closes
    /// the attached channels.
    pub async fn shutdown(&self) {
        log::info!("Shutting down SessionManager...");
        self.inner.shutdown.cancel();

        let sessions: Vec<Arc<Session>> = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;
            registry
                .active
                .drain()
                .chain(registry.hosted.drain())
                .map(|(_, s)| s)
                .collect()
        };
        self.inner.reaper.purge_all();

        for session in &sessions {
            session.abort_tasks();
            self.inner.heartbeats.remove(session.id());
            if let Some(channel) = session.channel().detach()
                && let Err(e) = channel.close().await
            {
                log::warn!("[char {}] Failed to close channel: {e}", session.id());
            }
        }

        let background: Vec<JoinHandle<()>> = self.inner.background.lock().drain(..).collect();
        for handle in background {
            let _ = handle.await;
        }
        log::info!("SessionManager shutdown complete ({} sessions)", sessions.len());
    }

    /// Whether `shutdown` was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let registry = self.registry.get_mut();
        for session in registry.active.values().chain(registry.hosted.values()) {
            session.abort_tasks();
        }
        for handle in self.background.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Detach the session's channel and close it in the background
fn close_detached(channel: &SessionChannel) {
    if let Some(detached) = channel.detach() {
        tokio::spawn(async move {
            let _ = detached.close().await;
        });
    }
}
