//! HTTP-backed planner and store clients (feature `http`)

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{Result, SessionError};
use crate::planner::{Decision, PlanRequest, Planner};
use crate::store::{Query, Store};

/// Planner that posts each request as JSON and decodes a [`Decision`]
pub struct HttpPlanner {
    client: Client,
    url: String,
}

impl HttpPlanner {
    /// Create a planner posting to `url`
    ///
    /// # Errors
    /// Returns `SessionError::InvalidConfig` if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::invalid_config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Planner for HttpPlanner {
    fn plan<'a>(&'a self, request: &'a PlanRequest) -> BoxFuture<'a, Result<Decision>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .json(request)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| planner_error(request, &e))?;
            response
                .json::<Decision>()
                .await
                .map_err(|e| planner_error(request, &e))
        })
    }
}

fn planner_error(request: &PlanRequest, e: &reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::timeout(format!("planner '{}': {e}", request.name()))
    } else {
        SessionError::planner_failure(format!("planner '{}': {e}", request.name()), 1)
    }
}

/// Store mapped onto a REST document service
///
/// - `GET    {base}/{collection}/{key}` fetches a keyed document (404 = absent)
/// - `PUT    {base}/{collection}/{key}` replaces it
/// - `POST   {base}/{collection}` appends to the log
/// - `POST   {base}/{collection}/_query` queries the log
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    /// Create a store client rooted at `base_url`
    ///
    /// # Errors
    /// Returns `SessionError::InvalidConfig` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::invalid_config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, parts: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for part in parts {
            url.push('/');
            url.push_str(part);
        }
        url
    }
}

fn store_error(op: &str, collection: &str, e: &reqwest::Error) -> SessionError {
    if e.is_timeout() {
        SessionError::timeout(format!("store {op} on '{collection}': {e}"))
    } else {
        SessionError::store(format!("{op} on '{collection}': {e}"))
    }
}

impl Store for HttpStore {
    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(&[collection, key]))
                .send()
                .await
                .map_err(|e| store_error("get", collection, &e))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = response
                .error_for_status()
                .map_err(|e| store_error("get", collection, &e))?;
            response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|e| store_error("get", collection, &e))
        })
    }

    fn put<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        doc: Value,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .put(self.url(&[collection, key]))
                .json(&doc)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| store_error("put", collection, &e))?;
            Ok(())
        })
    }

    fn list<'a>(&'a self, collection: &'a str, limit: usize) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            self.client
                .get(format!("{}?limit={limit}", self.url(&[collection])))
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| store_error("list", collection, &e))?
                .json::<Vec<Value>>()
                .await
                .map_err(|e| store_error("list", collection, &e))
        })
    }

    fn append<'a>(&'a self, collection: &'a str, doc: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .post(self.url(&[collection]))
                .json(&doc)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| store_error("append", collection, &e))?;
            Ok(())
        })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        query: &'a Query,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move {
            let filters: serde_json::Map<String, Value> = query.filters.iter().cloned().collect();
            let body = json!({
                "filters": filters,
                "limit": query.limit,
                "newestFirst": query.newest_first,
            });
            self.client
                .post(self.url(&[collection, "_query"]))
                .json(&body)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| store_error("query", collection, &e))?
                .json::<Vec<Value>>()
                .await
                .map_err(|e| store_error("query", collection, &e))
        })
    }
}
