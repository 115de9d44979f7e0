use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::transport::TransportError;

use super::tag::TagSet;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing fetched yet, or the value was discarded by invalidation.
    Idle,
    /// A fetch is in flight. The previous value, if any, is still readable.
    Loading,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed. The previous value, if any, is kept.
    Error,
}

pub(crate) type Patch = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A pending optimistic change layered over the fetched value.
#[derive(Clone)]
pub(crate) struct Overlay {
    pub id: u64,
    pub patch: Patch,
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A cached entry with status, staleness and subscription bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub value: Option<Value>,
    pub status: Status,
    pub error: Option<TransportError>,
    pub tags: TagSet,
    pub subscribers: usize,
    pub is_stale: bool,
    pub updated_at: Option<Instant>,
    /// Generation of the fetch currently in flight.
    pub in_flight: Option<u64>,
    /// Status to restore if the in-flight fetch is abandoned.
    pub status_before_fetch: Status,
    /// Set by an invalidation that subscribers have not acted on yet.
    pub refetch_pending: bool,
    /// Bumped on every re-subscription; a pending eviction only proceeds if
    /// it still matches.
    pub release_epoch: u64,
    /// Bumped on every observable change.
    pub revision: u64,
    pub overlays: Vec<Overlay>,
}

impl CacheEntry {
    /// Creates an idle entry with no data.
    pub fn new() -> Self {
        Self {
            value: None,
            status: Status::Idle,
            error: None,
            tags: TagSet::new(),
            subscribers: 0,
            is_stale: false,
            updated_at: None,
            in_flight: None,
            status_before_fetch: Status::Idle,
            refetch_pending: false,
            release_epoch: 0,
            revision: 0,
            overlays: Vec::new(),
        }
    }

    /// Checks if this entry is stale based on the given stale time.
    pub fn check_staleness(&mut self, stale_time: Duration) -> bool {
        if let Some(updated_at) = self.updated_at
            && updated_at.elapsed() > stale_time
        {
            self.is_stale = true;
        }
        self.is_stale
    }

    /// Whether a subscriber arriving now should start (or join) a fetch.
    pub fn needs_fetch(&mut self, stale_time: Duration) -> bool {
        match self.status {
            Status::Idle | Status::Error => true,
            Status::Loading => false,
            Status::Success => self.check_staleness(stale_time),
        }
    }

    /// Marks this entry as stale.
    pub fn mark_stale(&mut self) {
        self.is_stale = true;
        self.touch();
    }

    /// Stores a successful result, resetting timestamp and staleness.
    pub fn update(&mut self, data: Value, tags: &TagSet) {
        self.value = Some(data);
        self.status = Status::Success;
        self.error = None;
        self.tags.clone_from(tags);
        self.updated_at = Some(Instant::now());
        self.is_stale = false;
        self.touch();
    }

    /// Records a failure, keeping the last known value.
    pub fn fail(&mut self, error: TransportError) {
        self.status = Status::Error;
        self.error = Some(error);
        self.touch();
    }

    /// Drops the value so the next subscriber fetches from scratch.
    pub fn discard(&mut self) {
        self.value = None;
        self.status = Status::Idle;
        self.error = None;
        self.tags.clear();
        self.updated_at = None;
        self.is_stale = false;
        self.refetch_pending = false;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }

    /// The value as bindings see it: fetched data with overlays applied in order.
    pub fn view(&self) -> Option<Value> {
        let value = self.value.as_ref()?;
        if self.overlays.is_empty() {
            return Some(value.clone());
        }
        Some(
            self.overlays
                .iter()
                .fold(value.clone(), |acc, overlay| (overlay.patch)(&acc)),
        )
    }
}
