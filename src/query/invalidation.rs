//! Invalidation graph: which mutation dirties which cached results.
//!
//! Edges run mutation → tags → entries. The first hop is static and built
//! from the registry; the second is resolved against the store at the
//! moment the mutation succeeds, using the tags each entry's producing query
//! attached to it. Invalidation is set-based: applying the same tags twice,
//! or the union of two concurrent mutations' tags, ends in the same state.

use std::collections::HashMap;

use super::key::QueryKey;
use super::registry::{OperationKind, Registry};
use super::store::CacheStore;
use super::tag::TagSet;

#[derive(Debug, Clone, Default)]
pub struct InvalidationGraph {
    edges: HashMap<String, TagSet>,
    providers: HashMap<String, TagSet>,
}

impl InvalidationGraph {
    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        let mut graph = Self::default();
        for operation in registry.iter() {
            match operation.kind() {
                OperationKind::Mutation => {
                    graph
                        .edges
                        .insert(operation.name().to_string(), operation.invalidated_tags().clone());
                }
                OperationKind::Query => {
                    graph
                        .providers
                        .insert(operation.name().to_string(), operation.provided_tags().clone());
                }
            }
        }
        graph
    }

    /// Tags dirtied by `mutation`, if it is a known mutation.
    #[must_use]
    pub fn tags_for(&self, mutation: &str) -> Option<&TagSet> {
        self.edges.get(mutation)
    }

    /// Names of the queries a mutation can affect, sorted.
    #[must_use]
    pub fn affected_queries(&self, mutation: &str) -> Vec<&str> {
        let Some(tags) = self.edges.get(mutation) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .providers
            .iter()
            .filter(|(_, provided)| !provided.is_disjoint(tags))
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Invalidates every entry tagged with one of `mutation`'s tags.
    ///
    /// Returns the keys that were matched.
    pub fn on_mutation_success(&self, store: &CacheStore, mutation: &str) -> Vec<QueryKey> {
        match self.edges.get(mutation) {
            Some(tags) => {
                let keys = Self::invalidate_tags(store, tags);
                tracing::debug!(mutation, ?tags, invalidated = keys.len(), "Mutation succeeded");
                keys
            }
            None => Vec::new(),
        }
    }

    /// Invalidates every entry tagged with one of `tags`.
    pub fn invalidate_tags(store: &CacheStore, tags: &TagSet) -> Vec<QueryKey> {
        if tags.is_empty() {
            return Vec::new();
        }
        let keys = store.keys_with_tags(tags);
        store.invalidate(&keys);
        keys
    }
}
