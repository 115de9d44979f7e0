//! In-memory REST backend for local development and tests.
//!
//! [`MockTransport`] answers requests from named JSON collections the way a
//! small REST server would, so the rest of the crate can run without a
//! backend. It is also the controllable source used throughout the test
//! suite: it counts calls, can be switched offline, can inject latency and
//! can fail the next request on a given route.
//!
//! # Routing
//!
//! Paths are split into segments. An odd number of segments names a
//! collection (`/flashcards`, `/tests/1/parts`); an even number names an item
//! in the collection formed by all but the last segment (`/flashcards/42`).
//!
//! | Request                | Effect                                         |
//! |------------------------|------------------------------------------------|
//! | `GET /c`               | list, filtered by query params, paginated      |
//! | `GET /c/{id}`          | single item or 404                             |
//! | `POST /c`              | insert, assigning a numeric `id` if missing    |
//! | `PUT /c/{id}`          | replace (the `id` is preserved)                |
//! | `PATCH /c/{id}`        | shallow merge                                  |
//! | `DELETE /c/{id}`       | remove and return the removed item             |
//!
//! Paths seeded with [`MockTransport::with_document`] answer `GET` with a
//! fixed value instead.
//!
//! Pagination uses `_page` (1-based) and `_limit`; every other query param is
//! an equality filter on the item field of the same name.
//!
//! ```
//! use serde_json::json;
//! use toeic_query::transport::mock::MockTransport;
//!
//! let mock = MockTransport::new()
//!     .with_collection("categories", vec![json!({"id": 1, "name": "Office"})]);
//! assert_eq!(mock.collection("categories").len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::{Method, Request, Transport, TransportError, TransportResult};

#[derive(Debug, Default)]
struct MockState {
    collections: DashMap<String, Vec<Value>>,
    documents: DashMap<String, Value>,
    calls: DashMap<(Method, String), usize>,
    failures: Mutex<VecDeque<Failure>>,
    latency: Mutex<Duration>,
    offline: AtomicBool,
}

#[derive(Debug)]
struct Failure {
    method: Method,
    path: String,
    status: u16,
    body: Value,
}

/// A shareable in-memory backend. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a collection, replacing any previous content.
    #[must_use]
    pub fn with_collection(self, name: &str, items: Vec<Value>) -> Self {
        self.seed(name, items);
        self
    }

    /// Seeds a collection, replacing any previous content.
    pub fn seed(&self, name: &str, items: Vec<Value>) {
        self.state.collections.insert(normalize(name), items);
    }

    /// Serves `value` as-is for `GET` on `path`.
    #[must_use]
    pub fn with_document(self, path: &str, value: Value) -> Self {
        self.state.documents.insert(normalize(path), value);
        self
    }

    /// Current content of a collection (empty if unknown).
    #[must_use]
    pub fn collection(&self, name: &str) -> Vec<Value> {
        self.state
            .collections
            .get(&normalize(name))
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Simulates an unreachable server: every request fails as disconnected.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay applied before every response.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    /// Makes the next matching request fail with `status` and `body`.
    pub fn fail_next(&self, method: Method, path: &str, status: u16, body: Value) {
        lock(&self.state.failures).push_back(Failure {
            method,
            path: normalize(path),
            status,
            body,
        });
    }

    /// Number of requests received for `method path`, including failed ones.
    #[must_use]
    pub fn calls(&self, method: Method, path: &str) -> usize {
        self.state
            .calls
            .get(&(method, normalize(path)))
            .map_or(0, |count| *count)
    }

    /// Number of requests received on any route.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state.calls.iter().map(|entry| *entry.value()).sum()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: Request, cancel: CancellationToken) -> BoxFuture<'static, TransportResult> {
        let state = self.state.clone();

        Box::pin(async move {
            let path = normalize(&request.path);
            *state.calls.entry((request.method, path.clone())).or_insert(0) += 1;

            let latency = *lock(&state.latency);
            tokio::select! {
                () = cancel.cancelled() => return Err(TransportError::cancelled()),
                () = tokio::time::sleep(latency) => {}
            }

            if state.offline.load(Ordering::SeqCst) {
                return Err(TransportError::disconnected());
            }
            if let Some(failure) = state.take_failure(request.method, &path) {
                return Err(TransportError::server(failure.status, Some(failure.body.to_string())));
            }

            let result = state.route(&request, &path);
            tracing::trace!(%request, ok = result.is_ok(), "Mock backend answered");
            result
        })
    }
}

impl MockState {
    fn take_failure(&self, method: Method, path: &str) -> Option<Failure> {
        let mut failures = lock(&self.failures);
        let index = failures
            .iter()
            .position(|failure| failure.method == method && failure.path == path)?;
        failures.remove(index)
    }

    fn route(&self, request: &Request, path: &str) -> TransportResult {
        if request.method == Method::Get
            && let Some(document) = self.documents.get(path)
        {
            return Ok(document.clone());
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(not_found());
        }

        if segments.len() % 2 == 1 {
            let collection = segments.join("/");
            match request.method {
                Method::Get => Ok(self.list(&collection, &request.query)),
                Method::Post => self.insert(&collection, request.body.as_ref()),
                Method::Put | Method::Patch | Method::Delete => Err(status(405, "Method not allowed")),
            }
        } else {
            let (id, rest) = segments.split_last().ok_or_else(not_found)?;
            let id = percent_decode_str(id).decode_utf8_lossy();
            let collection = rest.join("/");
            match request.method {
                Method::Get => self.find(&collection, &id),
                Method::Put => self.replace(&collection, &id, request.body.as_ref()),
                Method::Patch => self.merge(&collection, &id, request.body.as_ref()),
                Method::Delete => self.remove(&collection, &id),
                Method::Post => Err(status(405, "Method not allowed")),
            }
        }
    }

    fn list(&self, collection: &str, query: &[(String, String)]) -> Value {
        let items = self
            .collections
            .get(collection)
            .map(|items| items.clone())
            .unwrap_or_default();

        let mut page = None;
        let mut limit = None;
        let mut filters = Vec::new();
        for (key, value) in query {
            match key.as_str() {
                "_page" => page = value.parse::<usize>().ok(),
                "_limit" => limit = value.parse::<usize>().ok(),
                _ => filters.push((key.as_str(), value.as_str())),
            }
        }

        let filtered = items.into_iter().filter(|item| {
            filters
                .iter()
                .all(|(field, expected)| item.get(*field).is_some_and(|actual| scalar(actual) == *expected))
        });

        let selected: Vec<Value> = match limit {
            Some(limit) => {
                let page = page.unwrap_or(1).max(1);
                filtered.skip((page - 1).saturating_mul(limit)).take(limit).collect()
            }
            None => filtered.collect(),
        };
        Value::Array(selected)
    }

    fn find(&self, collection: &str, id: &str) -> TransportResult {
        self.collections
            .get(collection)
            .and_then(|items| items.iter().find(|item| has_id(item, id)).cloned())
            .ok_or_else(not_found)
    }

    fn insert(&self, collection: &str, body: Option<&Value>) -> TransportResult {
        let Some(Value::Object(fields)) = body else {
            return Err(status(400, "Request body must be a JSON object"));
        };

        let mut items = self.collections.entry(collection.to_string()).or_default();
        let mut item = fields.clone();
        if !item.contains_key("id") {
            let next = items
                .iter()
                .filter_map(|existing| existing.get("id").and_then(Value::as_u64))
                .max()
                .map_or(1, |max| max + 1);
            item.insert("id".to_string(), json!(next));
        }
        let item = Value::Object(item);
        items.push(item.clone());
        Ok(item)
    }

    fn replace(&self, collection: &str, id: &str, body: Option<&Value>) -> TransportResult {
        let Some(Value::Object(fields)) = body else {
            return Err(status(400, "Request body must be a JSON object"));
        };
        self.update(collection, id, |item| {
            let original_id = item.get("id").cloned();
            let mut replacement = fields.clone();
            if let Some(original_id) = original_id {
                replacement.insert("id".to_string(), original_id);
            }
            *item = replacement;
        })
    }

    fn merge(&self, collection: &str, id: &str, body: Option<&Value>) -> TransportResult {
        let Some(Value::Object(fields)) = body else {
            return Err(status(400, "Request body must be a JSON object"));
        };
        self.update(collection, id, |item| {
            for (key, value) in fields {
                if key != "id" {
                    item.insert(key.clone(), value.clone());
                }
            }
        })
    }

    fn update(&self, collection: &str, id: &str, apply: impl FnOnce(&mut Map<String, Value>)) -> TransportResult {
        let mut items = self.collections.get_mut(collection).ok_or_else(not_found)?;
        let item = items
            .iter_mut()
            .find(|item| has_id(item, id))
            .ok_or_else(not_found)?;
        if let Value::Object(fields) = item {
            apply(fields);
        }
        Ok(item.clone())
    }

    fn remove(&self, collection: &str, id: &str) -> TransportResult {
        let mut items = self.collections.get_mut(collection).ok_or_else(not_found)?;
        let index = items.iter().position(|item| has_id(item, id)).ok_or_else(not_found)?;
        Ok(items.remove(index))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn has_id(item: &Value, id: &str) -> bool {
    item.get("id").is_some_and(|value| scalar(value) == id)
}

fn status(code: u16, message: &str) -> TransportError {
    TransportError::server(code, Some(json!({ "message": message }).to_string()))
}

fn not_found() -> TransportError {
    status(404, "Not found")
}
