//! Tests for the per-character workflow engine

#[path = "../common/mod.rs"]
mod common;

use character_session_engine::planner::{Decision, PlanRequest, planner_fn};
use character_session_engine::store::{Query, Store, collections};
use character_session_engine::{
    CharacterId, MemoryChannel, MemoryPeer, MemoryStore, Result, SessionError, SessionManager,
    WorkflowNode,
};
use common::{
    ScriptedPlanner, canned, envelope, eventually, fast_options, init_logging, recv_named,
};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn activate(manager: &SessionManager, id: i64) -> MemoryPeer {
    let (connection, peer) = MemoryChannel::pair();
    manager
        .activate(CharacterId::new(id), connection.channel)
        .expect("activation");
    peer
}

async fn send(manager: &SessionManager, id: i64, name: &str, data: Value) {
    manager
        .route_message(CharacterId::new(id), &envelope(id, name, data))
        .await
        .expect("routed");
}

fn commands(env: &character_session_engine::Envelope) -> Vec<String> {
    serde_json::from_value(env.data["command"].clone()).expect("command list")
}

#[tokio::test]
async fn test_plan_then_replan_after_failed_action() {
    init_logging();
    let planner = ScriptedPlanner::canned();
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(planner.clone(), store.clone(), fast_options())
        .expect("valid options");
    let mut peer = activate(&manager, 1);

    send(&manager, 1, "onestep", json!({})).await;
    let list = recv_named(&mut peer, "actionList").await;
    assert_eq!(commands(&list), vec!["go work", "eat bread"]);
    assert_eq!(store.log_len(collections::OBJECTIVES), 1);
    assert_eq!(store.log_len(collections::META_SEQUENCES), 1);

    send(
        &manager,
        1,
        "actionresult",
        json!({ "result": false, "action": "go work", "msg": "workplace closed" }),
    )
    .await;
    let list = recv_named(&mut peer, "actionList").await;
    assert_eq!(commands(&list), vec!["retry"]);

    let replan = planner
        .requests()
        .into_iter()
        .find_map(|r| match r {
            PlanRequest::Replan { context, .. } => Some(context),
            _ => None,
        })
        .expect("replan request");
    assert_eq!(replan.failed_action, json!("go work"));
    assert_eq!(replan.message, "workplace closed");
    assert_eq!(replan.current_meta_seq, vec!["go work", "eat bread"]);
    assert_eq!(replan.current_objective.as_deref(), Some("earn money"));

    let sequences = store.log(collections::META_SEQUENCES);
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences[1]["replan"], true);
    assert_eq!(sequences[1]["characterId"], 1);
}

#[tokio::test]
async fn test_events_are_dispatched_one_at_a_time() {
    init_logging();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let planner = {
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        planner_fn(move |request| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(canned(&request))
            }
        })
    };
    let manager = SessionManager::new(planner, Arc::new(MemoryStore::new()), fast_options())
        .expect("valid options");
    let mut peer = activate(&manager, 2);

    for _ in 0..4 {
        send(&manager, 2, "onestep", json!({})).await;
    }
    send(&manager, 2, "reflect", json!({})).await;

    for _ in 0..4 {
        recv_named(&mut peer, "actionList").await;
    }
    let session = manager.get(CharacterId::new(2)).expect("session");
    eventually("reflection", || {
        session.workflow().state().log.reflections().count() == 1
    })
    .await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(session.workflow().state().log.objectives().count(), 4);
}

#[tokio::test]
async fn test_planner_failure_keeps_session_alive() {
    init_logging();
    let planner = ScriptedPlanner::new(|request| match request {
        PlanRequest::DailyObjectives { .. } => Err(SessionError::timeout("model overloaded")),
        other => Ok(canned(other)),
    });
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(planner.clone(), store.clone(), fast_options())
        .expect("valid options");
    let mut peer = activate(&manager, 3);
    let id = CharacterId::new(3);

    send(&manager, 3, "onestep", json!({})).await;
    eventually("three planner attempts", || {
        planner.count("daily_objectives") == 3
    })
    .await;

    send(&manager, 3, "reflect", json!({})).await;
    eventually("reflection stored", || {
        store.log_len(collections::REFLECTIONS) == 1
    })
    .await;

    eventually("back to sensing", || {
        manager
            .status(id)
            .is_some_and(|s| s.current_node == WorkflowNode::Sensing)
    })
    .await;

    assert!(peer.try_recv().is_none());
    assert!(!manager.status(id).expect("status").terminated);
    assert_eq!(store.log_len(collections::OBJECTIVES), 0);
}

/// Store whose appends always fail
struct BrokenStore {
    inner: MemoryStore,
}

impl Store for BrokenStore {
    fn get<'a>(&'a self, collection: &'a str, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        self.inner.get(collection, key)
    }

    fn put<'a>(&'a self, collection: &'a str, key: &'a str, doc: Value) -> BoxFuture<'a, Result<()>> {
        self.inner.put(collection, key, doc)
    }

    fn list<'a>(&'a self, collection: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<Value>>> {
        self.inner.list(collection, limit)
    }

    fn append<'a>(&'a self, collection: &'a str, _doc: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Err(SessionError::store(format!("{collection} unavailable"))) })
    }

    fn query<'a>(&'a self, collection: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Vec<Value>>> {
        self.inner.query(collection, query)
    }
}

#[tokio::test]
async fn test_store_failure_in_node_terminates_session() {
    init_logging();
    let store = Arc::new(BrokenStore {
        inner: MemoryStore::new(),
    });
    let manager = SessionManager::new(ScriptedPlanner::canned(), store, fast_options())
        .expect("valid options");
    let _peer = activate(&manager, 4);
    let id = CharacterId::new(4);

    send(&manager, 4, "onestep", json!({})).await;
    let session = manager.get(id).expect("session");
    let mut nodes = session.workflow().subscribe_nodes();
    tokio::time::timeout(
        common::RECV_TIMEOUT,
        nodes.wait_for(|node| *node == WorkflowNode::Terminated),
    )
    .await
    .expect("termination in time")
    .expect("node watch open");

    assert!(session.is_terminated());
    // Still indexed until purged
    assert!(manager.has(id));
    let result = manager
        .route_message(id, &envelope(4, "reflect", json!({})))
        .await;
    assert!(matches!(result, Err(SessionError::SessionTerminated(_))));

    // Heartbeats are still answered by the connection layer
    manager
        .route_message(id, &envelope(4, "heartbeat", json!({})))
        .await
        .expect("heartbeat");
    assert!(manager.purge(id));
}

#[tokio::test]
async fn test_panic_is_isolated_to_one_session() {
    init_logging();
    let planner = planner_fn(|request| async move {
        if let PlanRequest::DailyObjectives { character, .. } = &request
            && character.get() == 5
        {
            panic!("planner bug for character 5");
        }
        Ok(canned(&request))
    });
    let manager = SessionManager::new(planner, Arc::new(MemoryStore::new()), fast_options())
        .expect("valid options");
    let _crashing = activate(&manager, 5);
    let mut healthy = activate(&manager, 6);

    send(&manager, 5, "onestep", json!({})).await;
    eventually("termination of 5", || {
        manager
            .status(CharacterId::new(5))
            .is_some_and(|s| s.terminated)
    })
    .await;

    send(&manager, 6, "onestep", json!({})).await;
    let list = recv_named(&mut healthy, "actionList").await;
    assert_eq!(list.character_id, Some(CharacterId::new(6)));
    assert!(!manager.status(CharacterId::new(6)).expect("status").terminated);
}

#[tokio::test]
async fn test_new_day_applies_for_job_and_decides() {
    init_logging();
    let planner = ScriptedPlanner::canned();
    let store = Arc::new(MemoryStore::new());
    store
        .append(collections::JOBS, json!({ "title": "baker", "salary": 30 }))
        .await
        .expect("seed job");
    let manager = SessionManager::new(planner.clone(), store.clone(), fast_options())
        .expect("valid options");
    let mut peer = activate(&manager, 7);

    send(&manager, 7, "new_day", json!({})).await;
    let cv = recv_named(&mut peer, "cv_submission").await;
    assert_eq!(cv.data["job"]["title"], "baker");
    assert_eq!(cv.data["cv"], "hard worker");

    let decision = recv_named(&mut peer, "mayor_decision").await;
    let decisions = decision.data["decisions"].as_array().expect("decisions");
    assert_eq!(decisions.len(), 1);
    assert_eq!(store.log_len(collections::CV_SUBMISSIONS), 1);
}

#[tokio::test]
async fn test_successful_action_merges_vitals() {
    init_logging();
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            collections::PROFILES,
            "8",
            json!({ "id": 8, "name": "Bea", "occupation": "farmer", "socialCapacity": 2 }),
        )
        .await
        .expect("seed profile");
    let manager = SessionManager::new(ScriptedPlanner::canned(), store, fast_options())
        .expect("valid options");
    let _peer = activate(&manager, 8);
    let id = CharacterId::new(8);

    send(
        &manager,
        8,
        "actionresult",
        json!({ "result": true, "vitals": { "money": 12.5, "inventory": { "bread": 2 } } }),
    )
    .await;

    let session = manager.get(id).expect("session");
    let state = session.workflow().state();
    assert_eq!(state.vitals.money, Some(12.5));
    assert_eq!(state.vitals.inventory.get("bread"), Some(&2));
    eventually("profile load", || {
        session.workflow().state().profile.name == "Bea"
    })
    .await;
}

#[tokio::test]
async fn test_malformed_messages_are_rejected() {
    init_logging();
    let manager = SessionManager::new(
        ScriptedPlanner::canned(),
        Arc::new(MemoryStore::new()),
        fast_options(),
    )
    .expect("valid options");
    let _peer = activate(&manager, 9);
    let id = CharacterId::new(9);

    let unknown = manager
        .route_message(id, &envelope(9, "dance", json!({})))
        .await;
    assert!(matches!(unknown, Err(SessionError::Protocol(_))));

    let malformed = manager
        .route_message(id, &envelope(9, "actionresult", json!({ "msg": "no result" })))
        .await;
    assert!(matches!(malformed, Err(SessionError::Protocol(_))));

    let missing = manager
        .route_message(CharacterId::new(99), &envelope(99, "onestep", json!({})))
        .await;
    assert!(matches!(missing, Err(SessionError::SessionNotFound(_))));
    assert!(!manager.status(id).expect("status").terminated);
}

#[tokio::test]
async fn test_wrong_decision_shape_is_a_planner_failure() {
    init_logging();
    let planner = planner_fn(|request| async move {
        match request {
            PlanRequest::Reflect { .. } => Ok(Decision::Necessity { needed: true }),
            other => Ok(canned(&other)),
        }
    });
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(planner, store.clone(), fast_options())
        .expect("valid options");
    let _peer = activate(&manager, 10);

    send(&manager, 10, "reflect", json!({})).await;
    send(&manager, 10, "onestep", json!({})).await;
    eventually("plan after failed reflection", || {
        store.log_len(collections::META_SEQUENCES) == 1
    })
    .await;
    assert_eq!(store.log_len(collections::REFLECTIONS), 0);
    assert!(!manager.status(CharacterId::new(10)).expect("status").terminated);
}
