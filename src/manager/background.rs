//! Background task spawning for the session manager
//!
//! Contains the two manager-wide tasks:
//! - the heartbeat scanner, which demotes silent characters
//! - the lifecycle listener, which reacts to broken channels and expired
//!   orphan entries
//!
//! Both hold only a weak reference to the manager and stop on the shutdown
//! token or once the manager is dropped.

use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::transport::ChannelFault;
use crate::types::identifiers::CharacterId;

use super::session_manager::{ManagerInner, SessionManager};

/// Spawn the periodic heartbeat scan (every half heartbeat timeout)
///
/// # Arguments
/// * `manager` - Weak handle to the manager state
/// * `shutdown` - Token cancelled by `SessionManager::shutdown`
pub(super) fn spawn_heartbeat_scanner(
    manager: Weak<ManagerInner>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let Some(period) = manager.upgrade().map(|m| m.options.scan_interval()) else {
        return tokio::spawn(async {});
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = manager.upgrade() else {
                break;
            };
            let demoted = SessionManager::from_inner(inner).apply_heartbeat_scan();
            if !demoted.is_empty() {
                log::info!("Heartbeat scan demoted {} character(s)", demoted.len());
            }
        }
        log::debug!("Heartbeat scanner stopped");
    })
}

/// Spawn the listener for channel faults and orphan expiries
///
/// # Arguments
/// * `manager` - Weak handle to the manager state
/// * `faults_rx` - Broken-channel reports from session channels
/// * `expired_rx` - Characters whose grace period elapsed
/// * `shutdown` - Token cancelled by `SessionManager::shutdown`
pub(super) fn spawn_lifecycle_listener(
    manager: Weak<ManagerInner>,
    mut faults_rx: mpsc::UnboundedReceiver<ChannelFault>,
    mut expired_rx: mpsc::UnboundedReceiver<CharacterId>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                Some(fault) = faults_rx.recv() => {
                    let Some(inner) = manager.upgrade() else { break };
                    let manager = SessionManager::from_inner(inner);
                    if manager.disconnect(fault.character_id, fault.generation) {
                        log::warn!(
                            "[char {}] Channel broken (generation {}), demoted",
                            fault.character_id,
                            fault.generation
                        );
                    }
                }
                Some(id) = expired_rx.recv() => {
                    let Some(inner) = manager.upgrade() else { break };
                    SessionManager::from_inner(inner).expire(id);
                }
                else => break,
            }
        }
        log::debug!("Lifecycle listener stopped");
    })
}
