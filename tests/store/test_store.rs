//! Tests for the in-memory store and the timeout wrapper

#[path = "../common/mod.rs"]
mod common;

use character_session_engine::store::{Query, Store, collections, get_as};
use character_session_engine::types::Profile;
use character_session_engine::{MemoryStore, Result, SessionError, TimedStore};
use common::init_logging;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_keyed_documents() {
    init_logging();
    let store = MemoryStore::new();

    assert!(store.get(collections::PROFILES, "1").await.unwrap().is_none());
    store
        .put(collections::PROFILES, "1", json!({ "id": 1, "name": "Ann" }))
        .await
        .unwrap();
    store
        .put(collections::PROFILES, "1", json!({ "id": 1, "name": "Anna", "socialCapacity": 3 }))
        .await
        .unwrap();

    let profile: Profile = get_as(&store, collections::PROFILES, "1")
        .await
        .unwrap()
        .expect("profile");
    assert_eq!(profile.name, "Anna");
    assert_eq!(profile.social_capacity, 3);
    // Keyed documents do not show up in the log
    assert_eq!(store.log_len(collections::PROFILES), 0);
}

#[tokio::test]
async fn test_list_keyed_documents() {
    init_logging();
    let store = MemoryStore::new();
    for id in ["9", "3", "5"] {
        store
            .put(collections::PROFILES, id, json!({ "id": id }))
            .await
            .unwrap();
    }
    // Log entries are not part of the listing
    store
        .append(collections::PROFILES, json!({ "id": "1" }))
        .await
        .unwrap();

    let listed = store.list(collections::PROFILES, 2).await.unwrap();
    let ids: Vec<&str> = listed.iter().filter_map(|d| d["id"].as_str()).collect();
    assert_eq!(ids, vec!["3", "5"]);
    assert!(store.list("missing", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_log_queries() {
    init_logging();
    let store = MemoryStore::new();
    for (owner, n) in [(1, "a"), (2, "b"), (1, "c"), (1, "d")] {
        store
            .append(collections::OBJECTIVES, json!({ "characterId": owner, "n": n }))
            .await
            .unwrap();
    }

    let mine = store
        .query(collections::OBJECTIVES, &Query::all().eq("characterId", 1))
        .await
        .unwrap();
    let names: Vec<&str> = mine.iter().filter_map(|d| d["n"].as_str()).collect();
    assert_eq!(names, vec!["a", "c", "d"]);

    let latest = store
        .query(
            collections::OBJECTIVES,
            &Query::all().eq("characterId", 1).newest_first().limit(2),
        )
        .await
        .unwrap();
    let names: Vec<&str> = latest.iter().filter_map(|d| d["n"].as_str()).collect();
    assert_eq!(names, vec!["d", "c"]);

    assert!(latest.iter().all(|d| d["_id"].is_string()));
    assert!(
        store
            .query("missing", &Query::all())
            .await
            .unwrap()
            .is_empty()
    );
}

struct SlowStore;

impl Store for SlowStore {
    fn get<'a>(&'a self, _collection: &'a str, _key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        })
    }

    fn put<'a>(&'a self, _collection: &'a str, _key: &'a str, _doc: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn list<'a>(&'a self, _collection: &'a str, _limit: usize) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn append<'a>(&'a self, _collection: &'a str, _doc: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(SessionError::store("disk full")) })
    }

    fn query<'a>(&'a self, _collection: &'a str, _query: &'a Query) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[tokio::test(start_paused = true)]
async fn test_timed_store_bounds_calls() {
    init_logging();
    let store = TimedStore::new(Arc::new(SlowStore), Duration::from_secs(8));

    let result = store.get(collections::PROFILES, "1").await;
    assert!(matches!(result, Err(SessionError::Timeout(_))));
    assert!(!result.unwrap_err().is_recoverable());

    // Errors from the inner store pass through untouched
    let result = store.append(collections::MESSAGES, json!({})).await;
    assert!(matches!(result, Err(SessionError::Store(_))));

    store.put(collections::PROFILES, "1", json!({})).await.unwrap();
}
