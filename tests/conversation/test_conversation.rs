//! Tests for the per-character conversation engine

#[path = "../common/mod.rs"]
mod common;

use character_session_engine::planner::{Decision, PlanRequest, planner_fn};
use character_session_engine::store::{Store, collections};
use character_session_engine::{
    CharacterId, ConversationState, MemoryChannel, MemoryPeer, MemoryStore, Planner,
    SessionManager,
};
use common::{ScriptedPlanner, canned, envelope, eventually, fast_options, init_logging, recv_named};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const ME: i64 = 7;

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            collections::PROFILES,
            "7",
            json!({ "id": ME, "name": "Ann", "socialCapacity": 2 }),
        )
        .await
        .expect("seed profile");
    for id in [8, 9] {
        store
            .put(collections::PROFILES, &id.to_string(), json!({ "id": id }))
            .await
            .expect("seed partner profile");
    }
    store
}

fn start(planner: Arc<dyn Planner>, store: Arc<MemoryStore>) -> (SessionManager, MemoryPeer) {
    let manager = SessionManager::new(planner, store, fast_options()).expect("valid options");
    let (connection, peer) = MemoryChannel::pair();
    manager
        .activate(CharacterId::new(ME), connection.channel)
        .expect("activation");
    (manager, peer)
}

async fn send(manager: &SessionManager, name: &str, data: Value) {
    manager
        .route_message(CharacterId::new(ME), &envelope(ME, name, data))
        .await
        .expect("routed");
}

fn state(manager: &SessionManager) -> Arc<ConversationState> {
    let session = manager
        .get(CharacterId::new(ME))
        .or_else(|| manager.get_hosted(CharacterId::new(ME)))
        .expect("session");
    Arc::clone(session.conversation().state())
}

fn turn(from: i64, to: i64, start: &str, flags: [bool; 2]) -> Value {
    json!({
        "from": from,
        "to": to,
        "content": "hi there",
        "startTime": start,
        "finishFlags": flags,
    })
}

#[tokio::test]
async fn test_daily_plan_then_ordered_starts() {
    init_logging();
    let planner = ScriptedPlanner::canned();
    let store = seeded_store().await;
    let (manager, mut peer) = start(planner.clone(), store.clone());

    send(&manager, "gameTime", json!({ "time": "2026-03-01 09:00:00" })).await;
    let conversation = state(&manager);
    eventually("daily plan", || conversation.daily_tasks().len() == 2).await;

    let planned = conversation.daily_tasks();
    assert_eq!(planned[0].topic, "weather");
    assert_eq!(planned[1].topic, "market");
    assert!(planned[0].scheduled_at < planned[1].scheduled_at);
    assert_eq!(conversation.profile().name, "Ann");

    let stored = store
        .document(collections::CONVERSATION_PLANS, "7:2026-03-01")
        .expect("stored plan");
    assert_eq!(stored["topics"], json!(["weather", "market"]));

    // Later the same day: no new plan, both starts are past due
    send(&manager, "gameTime", json!({ "time": "2026-03-01 23:00:00" })).await;

    let first = recv_named(&mut peer, "to_agent").await;
    let second = recv_named(&mut peer, "to_agent").await;
    assert_eq!(first.data["content"], "let's talk about weather");
    assert_eq!(second.data["content"], "let's talk about market");
    for opening in [&first, &second] {
        assert_eq!(opening.data["from"], ME);
        assert_eq!(opening.data["startTime"], "2026-03-01 23:00:00");
        assert_eq!(opening.data["finishFlags"], json!([false, false]));
    }
    let partners: HashSet<i64> = [&first, &second]
        .iter()
        .filter_map(|e| e.data["to"].as_i64())
        .collect();
    assert_eq!(partners, HashSet::from([8, 9]));

    eventually("queue drained", || conversation.daily_tasks().is_empty()).await;
    assert_eq!(planner.count("daily_topics"), 1);

    let store_ref = Arc::clone(&store);
    eventually("starts recorded in the plan", move || {
        store_ref
            .document(collections::CONVERSATION_PLANS, "7:2026-03-01")
            .and_then(|plan| plan["started"].as_array().map(Vec::len))
            == Some(2)
    })
    .await;
    assert_eq!(store.log_len(collections::MESSAGES), 2);
}

#[tokio::test]
async fn test_new_game_day_replans() {
    init_logging();
    let planner = ScriptedPlanner::new(|request| match request {
        PlanRequest::ConversationNecessity { .. } => Ok(Decision::Necessity { needed: false }),
        other => Ok(canned(other)),
    });
    let store = seeded_store().await;
    let (manager, mut peer) = start(planner.clone(), store.clone());

    send(&manager, "gameTime", json!({ "time": "2026-03-01 21:00:00" })).await;
    eventually("first plan", || planner.count("daily_topics") == 1).await;
    send(&manager, "gameTime", json!({ "time": "2026-03-01 23:30:00" })).await;
    send(&manager, "gameTime", json!({ "time": "2026-03-02 06:00:00" })).await;
    eventually("second plan", || planner.count("daily_topics") == 2).await;

    let conversation = state(&manager);
    eventually("plan for the new day", || {
        conversation
            .daily_tasks()
            .first()
            .is_some_and(|t| t.scheduled_at.date().to_string() == "2026-03-02")
    })
    .await;

    // Day one's starts were declined by the necessity check
    assert_eq!(store.log_len(collections::MESSAGES), 0);
    assert!(peer.try_recv().is_none());

    let past_topics = planner
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            PlanRequest::DailyTopics { past_topics, .. } => Some(past_topics),
            _ => None,
        })
        .nth(1)
        .expect("second topics request");
    assert!(past_topics.contains(&"weather".to_string()));
}

#[tokio::test]
async fn test_incoming_turn_gets_reply() {
    init_logging();
    let planner = ScriptedPlanner::canned();
    let store = seeded_store().await;
    let (manager, mut peer) = start(planner.clone(), store.clone());

    send(
        &manager,
        "to_agent",
        turn(8, ME, "2026-03-01 10:00:00", [false, false]),
    )
    .await;

    let reply = recv_named(&mut peer, "to_agent").await;
    assert_eq!(reply.data["from"], ME);
    assert_eq!(reply.data["to"], 8);
    assert_eq!(reply.data["content"], "nice to hear");
    assert_eq!(reply.data["startTime"], "2026-03-01 10:00:00");
    assert_eq!(reply.data["finishFlags"], json!([true, false]));

    let conversation = state(&manager);
    eventually("queue drained", || conversation.waiting_responses().is_empty()).await;
    let messages = store.log(collections::MESSAGES);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["pairKey"], "7:8");
}

#[tokio::test]
async fn test_finished_conversations_are_reconciled() {
    init_logging();
    let planner = ScriptedPlanner::canned();
    let store = seeded_store().await;
    let (manager, mut peer) = start(planner.clone(), store.clone());

    send(
        &manager,
        "to_agent",
        turn(8, ME, "2026-03-01 10:00:00", [true, true]),
    )
    .await;
    send(
        &manager,
        "read_only",
        json!({
            "participants": [9, ME],
            "startTime": "2026-03-01 11:00:00",
            "messages": [
                { "speaker": 9, "content": "morning" },
                { "speaker": ME, "content": "morning to you" },
            ],
        }),
    )
    .await;

    let store_ref = Arc::clone(&store);
    eventually("conversations persisted", move || {
        store_ref.log_len(collections::CONVERSATIONS) == 2
    })
    .await;
    let store_ref = Arc::clone(&store);
    eventually("relations updated", move || {
        store_ref.document(collections::INTIMACY, "7->9").is_some()
            && store_ref.document(collections::IMPRESSIONS, "7->8").is_some()
    })
    .await;

    let impression = store
        .document(collections::IMPRESSIONS, "7->8")
        .expect("impression");
    assert_eq!(impression["summary"]["tone"], "friendly");
    let intimacy = store
        .document(collections::INTIMACY, "7->9")
        .expect("intimacy");
    assert_eq!(intimacy["level"], 2);

    let encounters = store.log(collections::ENCOUNTERS);
    let partners: HashSet<i64> = encounters
        .iter()
        .filter_map(|e| e["partner"].as_i64())
        .collect();
    assert_eq!(partners, HashSet::from([8, 9]));

    assert!(state(&manager).ongoing_tasks().is_empty());
    assert_eq!(planner.count("reply"), 0);
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn test_reply_waits_for_reattached_channel() {
    init_logging();
    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);
    let reply_calls = Arc::new(AtomicUsize::new(0));
    let planner = {
        let reply_calls = Arc::clone(&reply_calls);
        planner_fn(move |request| {
            let mut gate = gate_rx.clone();
            let reply_calls = Arc::clone(&reply_calls);
            async move {
                if matches!(request, PlanRequest::Reply { .. }) {
                    reply_calls.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.wait_for(|open| *open).await;
                }
                Ok(canned(&request))
            }
        })
    };
    let store = seeded_store().await;
    let (manager, mut old_peer) = start(planner, store.clone());
    let id = CharacterId::new(ME);

    send(
        &manager,
        "to_agent",
        turn(8, ME, "2026-03-01 10:00:00", [false, false]),
    )
    .await;
    eventually("reply in flight", || reply_calls.load(Ordering::SeqCst) == 1).await;

    assert!(manager.demote(id));
    gate_tx.send_replace(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let conversation = state(&manager);
    assert_eq!(conversation.waiting_responses().len(), 1);
    assert_eq!(store.log_len(collections::MESSAGES), 0);
    while let Some(env) = old_peer.try_recv() {
        assert_ne!(env.message_name, "to_agent");
    }

    let (connection, mut new_peer) = MemoryChannel::pair();
    let activation = manager.activate(id, connection.channel).expect("resume");
    assert!(activation.is_resumed());

    let reply = recv_named(&mut new_peer, "to_agent").await;
    assert_eq!(reply.data["to"], 8);
    assert_eq!(reply.data["finishFlags"], json!([true, false]));
    eventually("queue drained", || conversation.waiting_responses().is_empty()).await;
    assert_eq!(store.log_len(collections::MESSAGES), 1);
}
