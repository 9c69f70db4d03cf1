//! Tests for the orphan reaper

#[path = "../common/mod.rs"]
mod common;

use character_session_engine::{CharacterId, OrphanReaper};
use common::init_logging;
use std::time::Duration;
use tokio::task::JoinHandle;

fn idle_task() -> JoinHandle<()> {
    tokio::spawn(std::future::pending::<()>())
}

#[tokio::test(start_paused = true)]
async fn test_tasks_reaped_after_grace() {
    init_logging();
    let (reaper, mut expired_rx) = OrphanReaper::new();
    let id = CharacterId::new(1);
    let task = idle_task();

    reaper.schedule(id, vec![task.abort_handle()], Duration::from_secs(60));
    assert!(reaper.is_pending(id));
    assert_eq!(reaper.remaining(id), Some(Duration::from_secs(60)));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(reaper.is_pending(id));
    assert!(!task.is_finished());

    let expired = expired_rx.recv().await;
    assert_eq!(expired, Some(id));
    assert!(!reaper.is_pending(id));
    assert!(task.await.is_err_and(|e| e.is_cancelled()));
}

#[tokio::test(start_paused = true)]
async fn test_extend_pushes_deadline_back() {
    init_logging();
    let (reaper, mut expired_rx) = OrphanReaper::new();
    let id = CharacterId::new(2);
    let task = idle_task();

    reaper.schedule(id, vec![task.abort_handle()], Duration::from_secs(10));
    assert!(reaper.extend(id, Duration::from_secs(20)));

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(reaper.is_pending(id));
    assert!(!task.is_finished());

    assert_eq!(expired_rx.recv().await, Some(id));
    assert!(task.await.is_err_and(|e| e.is_cancelled()));
    assert!(!reaper.extend(id, Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_tasks_running() {
    init_logging();
    let (reaper, mut expired_rx) = OrphanReaper::new();
    let id = CharacterId::new(3);
    let task = idle_task();

    reaper.schedule(id, vec![task.abort_handle()], Duration::from_secs(100));
    tokio::time::sleep(Duration::from_secs(40)).await;

    let (handles, remaining) = reaper.cancel(id).expect("pending entry");
    assert_eq!(handles.len(), 1);
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining >= Duration::from_secs(59));
    assert!(reaper.is_empty());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(!task.is_finished());
    assert!(expired_rx.try_recv().is_err());
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_reschedule_replaces_pending_timer() {
    init_logging();
    let (reaper, mut expired_rx) = OrphanReaper::new();
    let id = CharacterId::new(4);

    reaper.schedule(id, vec![idle_task().abort_handle()], Duration::from_secs(10));
    reaper.schedule(id, vec![idle_task().abort_handle()], Duration::from_secs(60));
    assert_eq!(reaper.len(), 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(reaper.is_pending(id));
    assert!(expired_rx.try_recv().is_err());

    assert_eq!(expired_rx.recv().await, Some(id));
    assert!(reaper.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_purge_is_immediate_and_idempotent() {
    init_logging();
    let (reaper, mut expired_rx) = OrphanReaper::new();
    let id = CharacterId::new(5);
    let task = idle_task();

    reaper.schedule(id, vec![task.abort_handle()], Duration::from_secs(60));
    assert!(reaper.purge(id));
    assert!(!reaper.purge(id));
    assert!(task.await.is_err_and(|e| e.is_cancelled()));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(expired_rx.try_recv().is_err());
    assert!(reaper.cancel(id).is_none());
}
