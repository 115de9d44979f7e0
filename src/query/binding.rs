//! Query bindings: subscriptions that keep a rendering unit in sync with a
//! cache entry.
//!
//! # Design Pattern: Subscription-based State Management
//!
//! A query is a **subscription**, not a call. While it is part of the
//! application's subscriptions it holds a live binding on its cache entry:
//!
//! 1. On mount the entry is acquired and its current state emitted; stale
//!    data is shown while a refetch runs in the background
//! 2. If the entry is idle, failed or stale, a fetch is started, or joined
//!    if another binding already started one
//! 3. Every later change of the entry (refetch, invalidation, optimistic
//!    overlay) is emitted again
//! 4. On unmount the entry is released and any fetch the binding owns is
//!    aborted; its result never reaches the cache
//!
//! # Example
//!
//! ```rust,ignore
//! use toeic_query::prelude::*;
//! use toeic_query::query::{Query, QueryResult};
//!
//! fn subscriptions(&self) -> Vec<Subscription<Message>> {
//!     vec![
//!         Subscription::new(Query::<Vec<Category>>::new(
//!             self.client.clone(),
//!             "getCategories",
//!             Value::Null,
//!         ))
//!         .map(Message::Categories),
//!     ]
//! }
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::subscription::{SubscriptionId, SubscriptionSource};
use crate::transport::{Request, TransportError};

use super::cache::Status;
use super::client::QueryClient;
use super::key::QueryKey;
use super::registry::{Operation, OperationKind, RegistryError, ValidationError};
use super::store::{CacheEvent, Change, EntrySnapshot, FetchTicket, SubscriptionGuard};

/// Error surfaced to bindings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl QueryError {
    /// `true` for the "server unavailable" failure.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_disconnected())
    }

    /// HTTP status, `0` when no response was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(e) => Some(e.status),
            _ => None,
        }
    }
}

/// The state of a query binding.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// The binding is skipped and will not fetch.
    Idle,
    /// Loading with nothing to show yet.
    Loading,
    /// Data is available.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale (a refetch is due or running).
        is_stale: bool,
    },
    /// The last fetch failed.
    Error {
        error: QueryError,
        /// The last successfully fetched data, still displayable.
        data: Option<T>,
    },
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    /// Returns the data to display, including stale data kept after an error.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } | QueryState::Error { data: Some(data), .. } => Some(data),
            _ => None,
        }
    }

    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub const fn is_idle(&self) -> bool {
        matches!(self.state, QueryState::Idle)
    }

    /// Returns `true` if the query is loading with nothing to show.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error { .. })
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }

    /// Returns `true` if the last fetch could not reach the server.
    pub fn is_disconnected(&self) -> bool {
        self.error().is_some_and(QueryError::is_disconnected)
    }
}

impl<T: DeserializeOwned> QueryResult<T> {
    const fn new(state: QueryState<T>) -> Self {
        Self { state }
    }

    /// What to show for an entry a fetch is about to (re)load.
    fn pending(snapshot: &EntrySnapshot) -> Self {
        match &snapshot.value {
            Some(value) => Self::success(value, true),
            None => Self::new(QueryState::Loading),
        }
    }

    fn from_snapshot(snapshot: &EntrySnapshot) -> Self {
        match snapshot.status {
            Status::Idle => Self::new(QueryState::Idle),
            Status::Loading => Self::pending(snapshot),
            Status::Success => match &snapshot.value {
                Some(value) => Self::success(value, snapshot.is_stale),
                None => Self::new(QueryState::Loading),
            },
            Status::Error => {
                let error = snapshot
                    .error
                    .clone()
                    .map_or_else(|| QueryError::Decode("missing error".to_string()), QueryError::from);
                let data = snapshot
                    .value
                    .as_ref()
                    .and_then(|value| serde_json::from_value(value.clone()).ok());
                Self::new(QueryState::Error { error, data })
            }
        }
    }

    fn success(value: &Value, is_stale: bool) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(data) => Self::new(QueryState::Success { data, is_stale }),
            Err(e) => Self::new(QueryState::Error {
                error: QueryError::Decode(e.to_string()),
                data: None,
            }),
        }
    }

    fn failed(error: QueryError) -> Self {
        Self::new(QueryState::Error { error, data: None })
    }
}

/// A query subscription bound to one cache entry.
///
/// Two `Query` values with the same operation, arguments, scope and skip
/// flag, mapped into the same message, are the same binding as far as the
/// subscription manager is concerned. Views mapping the result into the same
/// message need their own [`scope`](Self::scope) to each receive a copy.
pub struct Query<T> {
    client: Arc<QueryClient>,
    operation: String,
    key: QueryKey,
    skip: bool,
    scope: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Query<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Creates a binding on `operation` with `args`.
    ///
    /// # Arguments
    ///
    /// * `client` - The query client owning the cache
    /// * `operation` - Name of a registered query operation
    /// * `args` - Arguments object (or `Value::Null`)
    pub fn new(client: Arc<QueryClient>, operation: &str, args: Value) -> Self {
        let key = client.key(operation, &args);
        Self {
            client,
            operation: operation.to_string(),
            key,
            skip: false,
            scope: None,
            _marker: PhantomData,
        }
    }

    /// When `true`, the binding neither subscribes nor fetches and emits
    /// [`QueryState::Idle`]. Used for dependent queries waiting on an id.
    #[must_use]
    pub const fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Distinguishes this binding from others on the same entry.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl<T> SubscriptionSource for Query<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = QueryResult<T>;

    fn stream(&self) -> BoxStream<'static, Self::Output> {
        let client = self.client.clone();
        let operation = self.operation.clone();
        let key = self.key.clone();
        let skip = self.skip;

        stream::unfold(State::Initial, move |state| {
            let client = client.clone();
            let operation = operation.clone();
            let key = key.clone();

            async move { step(&client, &operation, &key, skip, state).await }
        })
        .boxed()
    }

    fn id(&self) -> SubscriptionId {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        SubscriptionId::of::<Self>(hasher.finish())
    }
}

impl<T> Hash for Query<T> {
    fn hash<H>(&self, hasher: &mut H)
    where
        H: Hasher,
    {
        self.key.hash(hasher);
        self.scope.hash(hasher);
        self.skip.hash(hasher);
    }
}

/// Live binding state, dropped on unmount.
struct Binding {
    operation: Operation,
    request: Request,
    rx: broadcast::Receiver<CacheEvent>,
    last_revision: u64,
    _guard: SubscriptionGuard,
}

/// Internal state machine for the Query subscription.
enum State {
    Initial,
    Fetching(Binding),
    Watching(Binding),
    Done,
}

async fn step<T: DeserializeOwned>(
    client: &QueryClient,
    operation: &str,
    key: &QueryKey,
    skip: bool,
    state: State,
) -> Option<(QueryResult<T>, State)> {
    let store = client.store();
    let mut state = state;

    loop {
        state = match state {
            State::Initial => {
                if skip {
                    return Some((QueryResult::new(QueryState::Idle), State::Done));
                }

                let prepared = client
                    .registry()
                    .get_kind(operation, OperationKind::Query)
                    .and_then(|op| Ok((op.clone(), op.request(key.args())?)));
                let (operation, request) = match prepared {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        tracing::warn!(%key, error = %e, "Query binding cannot be mounted");
                        return Some((QueryResult::failed(e.into()), State::Done));
                    }
                };

                // Subscribe before reading so no change slips between the
                // read and the first wait.
                let rx = store.subscribe();
                let guard = store.acquire(key);
                let snapshot = store.get_or_create(key);
                let fetch = store.should_fetch(key);
                tracing::debug!(%key, fetch, "Query binding mounted");

                let binding = Binding {
                    operation,
                    request,
                    rx,
                    last_revision: snapshot.revision,
                    _guard: guard,
                };
                return if fetch {
                    Some((QueryResult::pending(&snapshot), State::Fetching(binding)))
                } else {
                    Some((QueryResult::from_snapshot(&snapshot), State::Watching(binding)))
                };
            }

            State::Fetching(binding) => {
                match store.begin_fetch(key) {
                    FetchTicket::Perform(guard) => {
                        // Dropping this future (unmount) cancels the token,
                        // aborting the request, and abandons the fetch.
                        let cancel = CancellationToken::new();
                        let _abort = cancel.clone().drop_guard();
                        let result = client.execute(binding.request.clone(), cancel).await;
                        guard.complete(result, binding.operation.provided_tags());
                    }
                    FetchTicket::Join => {}
                }
                State::Watching(binding)
            }

            State::Watching(mut binding) => match binding.rx.recv().await {
                Ok(CacheEvent { key: changed, change }) if changed == *key => {
                    let Some(snapshot) = store.snapshot(key) else {
                        state = State::Watching(binding);
                        continue;
                    };
                    let refetch = change == Change::Invalidated && store.should_fetch(key);
                    let next = if refetch {
                        State::Fetching
                    } else {
                        State::Watching
                    };

                    if snapshot.revision == binding.last_revision {
                        next(binding)
                    } else {
                        binding.last_revision = snapshot.revision;
                        let result = if refetch {
                            QueryResult::pending(&snapshot)
                        } else {
                            QueryResult::from_snapshot(&snapshot)
                        };
                        return Some((result, next(binding)));
                    }
                }
                Ok(_) => State::Watching(binding),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(%key, skipped, "Query binding lagged; re-reading entry");
                    if store.should_fetch(key) {
                        State::Fetching(binding)
                    } else {
                        match store.snapshot(key) {
                            Some(snapshot) if snapshot.revision != binding.last_revision => {
                                binding.last_revision = snapshot.revision;
                                return Some((QueryResult::from_snapshot(&snapshot), State::Watching(binding)));
                            }
                            _ => State::Watching(binding),
                        }
                    }
                }
                Err(RecvError::Closed) => return None,
            },

            State::Done => return None,
        };
    }
}
