use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::transport::{Request, Transport, TransportResult};

use super::config::QueryConfig;
use super::invalidation::InvalidationGraph;
use super::key::QueryKey;
use super::registry::Registry;
use super::store::CacheStore;
use super::tag::{Tag, TagSet};

/// The query layer's composition root.
///
/// A `QueryClient` owns the read-only registry, the invalidation graph built
/// from it, the cache store and the transport. It is passed explicitly to
/// every binding (usually as `Arc<QueryClient>`), so tests build a fresh one
/// each time instead of sharing global state.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use toeic_query::query::{QueryClient, QueryConfig};
/// use toeic_query::transport::mock::MockTransport;
///
/// let registry = toeic_query::api::catalog().expect("catalog is consistent");
/// let client = Arc::new(QueryClient::with_config(
///     registry,
///     MockTransport::new(),
///     QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300)),
/// ));
/// assert!(client.store().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct QueryClient {
    registry: Arc<Registry>,
    graph: Arc<InvalidationGraph>,
    store: CacheStore,
    transport: Arc<dyn Transport>,
}

impl QueryClient {
    /// Creates a client with default configuration.
    #[must_use]
    pub fn new(registry: Registry, transport: impl Transport) -> Self {
        Self::with_config(registry, transport, QueryConfig::default())
    }

    /// Creates a client with the given configuration.
    #[must_use]
    pub fn with_config(registry: Registry, transport: impl Transport, config: QueryConfig) -> Self {
        Self::from_parts(registry, Arc::new(transport), config)
    }

    /// Creates a client around an already shared transport.
    #[must_use]
    pub fn from_parts(registry: Registry, transport: Arc<dyn Transport>, config: QueryConfig) -> Self {
        let graph = InvalidationGraph::from_registry(&registry);
        Self {
            registry: Arc::new(registry),
            graph: Arc::new(graph),
            store: CacheStore::new(config),
            transport,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn graph(&self) -> &InvalidationGraph {
        &self.graph
    }

    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The cache key a binding on `operation` with `args` would use.
    #[must_use]
    pub fn key(&self, operation: &str, args: &Value) -> QueryKey {
        QueryKey::new(operation, args)
    }

    /// Invalidates every entry tagged with one of `tags`, triggering refetch
    /// in mounted bindings.
    ///
    /// This returns a `Command` that performs the invalidation as a side
    /// effect and produces no message.
    ///
    /// ```rust,ignore
    /// fn update(&mut self, msg: Message) -> Command<Message> {
    ///     match msg {
    ///         Message::Refresh => self.client.invalidate([Tag::Flashcard]),
    ///     }
    /// }
    /// ```
    pub fn invalidate<Msg>(&self, tags: impl IntoIterator<Item = Tag>) -> Command<Msg>
    where
        Msg: Send + 'static,
    {
        let store = self.store.clone();
        let tags: TagSet = tags.into_iter().collect();

        Command::stream(
            futures::stream::once(async move {
                InvalidationGraph::invalidate_tags(&store, &tags);
            })
            .filter_map(|()| async { None }),
        )
    }

    /// Invalidates immediately and returns the matched keys.
    pub fn invalidate_now(&self, tags: impl IntoIterator<Item = Tag>) -> Vec<QueryKey> {
        let tags: TagSet = tags.into_iter().collect();
        InvalidationGraph::invalidate_tags(&self.store, &tags)
    }

    pub(crate) fn execute(&self, request: Request, cancel: CancellationToken) -> BoxFuture<'static, TransportResult> {
        self.transport.execute(request, cancel)
    }
}
