//! Document store collaborator
//!
//! Profiles, conversation history, impressions and decisions live in an
//! external store offering keyed documents (`get`/`put`/`list`) and
//! append-only logs (`append`/`query`). Each collection uses one of the two. The engine relies on the store's own per-call
//! atomicity and never layers transactions on top.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SessionError};

/// Collection names used by the engine
pub mod collections {
    /// Character profiles, keyed by character id
    pub const PROFILES: &str = "profiles";
    /// Daily objectives log
    pub const OBJECTIVES: &str = "objectives";
    /// Action sequence log
    pub const META_SEQUENCES: &str = "meta_sequences";
    /// Reflection log
    pub const REFLECTIONS: &str = "reflections";
    /// Job openings
    pub const JOBS: &str = "jobs";
    /// Job applications
    pub const CV_SUBMISSIONS: &str = "cv_submissions";
    /// Character arcs, keyed by character id
    pub const CHARACTER_ARCS: &str = "character_arcs";
    /// Daily conversation plans, keyed by `<id>:<date>`
    pub const CONVERSATION_PLANS: &str = "conversation_plans";
    /// Completed conversations log
    pub const CONVERSATIONS: &str = "conversations";
    /// Individual conversation turns log
    pub const MESSAGES: &str = "messages";
    /// Impressions, keyed by `<owner>:<partner>`
    pub const IMPRESSIONS: &str = "impressions";
    /// Intimacy levels, keyed by `<owner>:<partner>`
    pub const INTIMACY: &str = "intimacy";
    /// Encounters log (who met whom, when)
    pub const ENCOUNTERS: &str = "encounters";
}

// ============================================================================
// Query
// ============================================================================

/// Filter over an append-only log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Field equality filters, all of which must match
    pub filters: Vec<(String, Value)>,
    /// Maximum number of documents returned
    pub limit: Option<usize>,
    /// Return newest documents first
    pub newest_first: bool,
}

impl Query {
    /// Match every document
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a field equality filter
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    /// Limit the number of results
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return newest documents first
    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Whether a document satisfies every filter
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Durable document store
pub trait Store: Send + Sync {
    /// Fetch a keyed document
    ///
    /// # Errors
    /// Returns error if the store call fails
    fn get<'a>(&'a self, collection: &'a str, key: &'a str)
    -> BoxFuture<'a, Result<Option<Value>>>;

    /// Insert or replace a keyed document
    ///
    /// # Errors
    /// Returns error if the store call fails
    fn put<'a>(&'a self, collection: &'a str, key: &'a str, doc: Value)
    -> BoxFuture<'a, Result<()>>;

    /// Keyed documents of a collection in key order, at most `limit`
    ///
    /// # Errors
    /// Returns error if the store call fails
    fn list<'a>(&'a self, collection: &'a str, limit: usize)
    -> BoxFuture<'a, Result<Vec<Value>>>;

    /// Append a document to a log
    ///
    /// # Errors
    /// Returns error if the store call fails
    fn append<'a>(&'a self, collection: &'a str, doc: Value) -> BoxFuture<'a, Result<()>>;

    /// Query a log
    ///
    /// # Errors
    /// Returns error if the store call fails
    fn query<'a>(&'a self, collection: &'a str, query: &'a Query)
    -> BoxFuture<'a, Result<Vec<Value>>>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct Collection {
    keyed: HashMap<String, Value>,
    log: Vec<Value>,
}

/// Process-local store
///
/// Appended documents get a generated `_id` when they are JSON objects.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents appended to a log
    #[must_use]
    pub fn log_len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map_or(0, |c| c.log.len())
    }

    /// Snapshot of a log in append order
    #[must_use]
    pub fn log(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .map(|c| c.log.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a keyed document
    #[must_use]
    pub fn document(&self, collection: &str, key: &str) -> Option<Value> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|c| c.keyed.get(key).cloned())
    }

    fn list_sync(&self, collection: &str, limit: usize) -> Vec<Value> {
        let collections = self.collections.lock();
        let Some(c) = collections.get(collection) else {
            return Vec::new();
        };
        let mut keys: Vec<&String> = c.keyed.keys().collect();
        keys.sort();
        keys.into_iter()
            .take(limit)
            .filter_map(|k| c.keyed.get(k).cloned())
            .collect()
    }

    fn put_sync(&self, collection: &str, key: &str, doc: Value) {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .keyed
            .insert(key.to_string(), doc);
    }

    fn append_sync(&self, collection: &str, mut doc: Value) {
        if let Some(obj) = doc.as_object_mut() {
            obj.entry("_id")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        }
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .log
            .push(doc);
    }

    fn query_sync(&self, collection: &str, query: &Query) -> Vec<Value> {
        let collections = self.collections.lock();
        let Some(c) = collections.get(collection) else {
            return Vec::new();
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        if query.newest_first {
            c.log
                .iter()
                .rev()
                .filter(|doc| query.matches(doc))
                .take(limit)
                .cloned()
                .collect()
        } else {
            c.log
                .iter()
                .filter(|doc| query.matches(doc))
                .take(limit)
                .cloned()
                .collect()
        }
    }
}

impl Store for MemoryStore {
    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        let doc = self.document(collection, key);
        Box::pin(async move { Ok(doc) })
    }

    fn put<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        doc: Value,
    ) -> BoxFuture<'a, Result<()>> {
        self.put_sync(collection, key, doc);
        Box::pin(async { Ok(()) })
    }

    fn list<'a>(&'a self, collection: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<Value>>> {
        let docs = self.list_sync(collection, limit);
        Box::pin(async move { Ok(docs) })
    }

    fn append<'a>(&'a self, collection: &'a str, doc: Value) -> BoxFuture<'a, Result<()>> {
        self.append_sync(collection, doc);
        Box::pin(async { Ok(()) })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        query: &'a Query,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        let docs = self.query_sync(collection, query);
        Box::pin(async move { Ok(docs) })
    }
}

// ============================================================================
// Timeout wrapper
// ============================================================================

/// Store wrapper enforcing a fixed request timeout
///
/// A timeout surfaces as `SessionError::Timeout`; calls are not retried.
pub struct TimedStore {
    inner: Arc<dyn Store>,
    timeout: Duration,
}

impl TimedStore {
    /// Wrap a store with a request timeout
    pub fn new(inner: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        collection: &str,
        fut: BoxFuture<'_, Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::timeout(format!(
                "store {op} on '{collection}' exceeded {:?}",
                self.timeout
            ))),
        }
    }
}

impl Store for TimedStore {
    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(self.bounded("get", collection, self.inner.get(collection, key)))
    }

    fn put<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        doc: Value,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.bounded("put", collection, self.inner.put(collection, key, doc)))
    }

    fn list<'a>(&'a self, collection: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(self.bounded("list", collection, self.inner.list(collection, limit)))
    }

    fn append<'a>(&'a self, collection: &'a str, doc: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.bounded("append", collection, self.inner.append(collection, doc)))
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        query: &'a Query,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(self.bounded("query", collection, self.inner.query(collection, query)))
    }
}

/// Convenience: fetch and decode a keyed document
///
/// # Errors
/// Returns error if the store call fails or the document does not decode
pub async fn get_as<T: serde::de::DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(collection, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
