//! Cache store: the single source of truth for fetched data.
//!
//! Entry state changes only through [`begin_fetch`], [`resolve`] (via
//! [`FetchGuard::complete`]) and [`invalidate`], plus the subscription
//! bookkeeping done by [`acquire`] and the guard it returns.
//! Each entry point takes the entry's map lock, mutates, releases, and then
//! publishes a [`CacheEvent`]; nothing awaits while an entry is locked.
//!
//! [`begin_fetch`]: CacheStore::begin_fetch
//! [`resolve`]: CacheStore::resolve
//! [`invalidate`]: CacheStore::invalidate
//! [`acquire`]: CacheStore::acquire

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::transport::{TransportError, TransportResult};

use super::cache::{CacheEntry, Overlay, Patch, Status};
use super::config::QueryConfig;
use super::key::QueryKey;
use super::tag::TagSet;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Value, status or error changed; re-read the entry.
    Updated,
    /// The entry is stale and its subscribers should refetch.
    Invalidated,
    /// The entry was removed.
    Evicted,
}

/// Notification published after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub change: Change,
}

/// Read-only copy of an entry at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub key: QueryKey,
    /// Fetched value with pending optimistic overlays applied.
    pub value: Option<Value>,
    pub status: Status,
    pub error: Option<TransportError>,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub subscribers: usize,
    pub tags: TagSet,
    pub revision: u64,
}

impl EntrySnapshot {
    fn of(key: &QueryKey, entry: &CacheEntry) -> Self {
        Self {
            key: key.clone(),
            value: entry.view(),
            status: entry.status,
            error: entry.error.clone(),
            is_stale: entry.is_stale,
            is_fetching: entry.in_flight.is_some(),
            subscribers: entry.subscribers,
            tags: entry.tags.clone(),
            revision: entry.revision,
        }
    }
}

/// Outcome of [`CacheStore::begin_fetch`].
#[derive(Debug)]
pub enum FetchTicket {
    /// The caller owns the fetch and must complete (or drop) the guard.
    Perform(FetchGuard),
    /// A fetch is already in flight; wait for its [`Change::Updated`] event.
    Join,
}

/// Outcome of resolving a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The result was stored. `refetch` is set when an invalidation arrived
    /// while the fetch was in flight and subscribers were told to refetch.
    Applied { refetch: bool },
    /// The fetch was no longer current (abandoned, superseded or evicted).
    Discarded,
}

#[derive(Debug)]
struct StoreInner {
    entries: DashMap<QueryKey, CacheEntry>,
    events: broadcast::Sender<CacheEvent>,
    config: QueryConfig,
    generations: AtomicU64,
    overlays: AtomicU64,
}

/// Shared handle to the cache. Clones refer to the same entries.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    #[must_use]
    pub fn new(config: QueryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner {
                entries: DashMap::new(),
                events,
                config,
                generations: AtomicU64::new(1),
                overlays: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Receives every [`CacheEvent`] published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Every event published from now on, as a stream. Events missed by a
    /// lagging reader are skipped.
    pub fn events(&self) -> impl Stream<Item = CacheEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(|event| async move { event.ok() })
    }

    /// Returns the entry for `key`, creating an idle one if needed.
    ///
    /// A created entry nobody acquires is evicted after `cache_time`.
    pub fn get_or_create(&self, key: &QueryKey) -> EntrySnapshot {
        let (snapshot, unused) = {
            let mut created = false;
            let entry = self.inner.entries.entry(key.clone()).or_insert_with(|| {
                created = true;
                CacheEntry::new()
            });
            let unused = (created && entry.subscribers == 0).then_some(entry.release_epoch);
            (EntrySnapshot::of(key, &entry), unused)
        };
        if let Some(epoch) = unused {
            self.spawn_eviction(key, epoch);
        }
        snapshot
    }

    #[must_use]
    pub fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        self.inner.entries.get(key).map(|entry| EntrySnapshot::of(key, &entry))
    }

    /// Whether a subscriber arriving now should fetch: the entry is missing,
    /// idle, failed, stale, or has an undelivered invalidation.
    #[must_use]
    pub fn should_fetch(&self, key: &QueryKey) -> bool {
        let stale_time = self.inner.config.stale_time;
        self.inner.entries.get_mut(key).is_none_or(|mut entry| {
            if entry.in_flight.is_some() {
                return false;
            }
            entry.refetch_pending || entry.needs_fetch(stale_time)
        })
    }

    /// Marks `key` as loading unless a fetch is already in flight.
    ///
    /// Only the caller that receives [`FetchTicket::Perform`] talks to the
    /// transport; everyone else joins the pending fetch.
    pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
        let generation = {
            let mut entry = self.inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
            if entry.in_flight.is_some() {
                tracing::trace!(%key, "Joining in-flight fetch");
                return FetchTicket::Join;
            }
            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
            entry.in_flight = Some(generation);
            entry.status_before_fetch = entry.status;
            entry.status = Status::Loading;
            entry.refetch_pending = false;
            entry.touch();
            generation
        };

        tracing::debug!(%key, generation, "Fetch started");
        self.emit(key, Change::Updated);
        FetchTicket::Perform(FetchGuard {
            store: self.clone(),
            key: key.clone(),
            generation,
            armed: true,
        })
    }

    /// Stores the result of fetch `generation`.
    ///
    /// Success replaces the value and attaches `tags`; failure records the
    /// error and keeps the last known value. Results for a generation that
    /// is no longer in flight are discarded without touching the entry.
    pub fn resolve(&self, key: &QueryKey, generation: u64, result: TransportResult, tags: &TagSet) -> Resolution {
        let refetch = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                tracing::debug!(%key, generation, "Fetch resolved after eviction; discarded");
                return Resolution::Discarded;
            };
            if entry.in_flight != Some(generation) {
                tracing::debug!(%key, generation, "Fetch is no longer current; discarded");
                return Resolution::Discarded;
            }
            entry.in_flight = None;
            match result {
                Ok(value) => entry.update(value, tags),
                Err(error) => {
                    tracing::debug!(%key, status = error.status, message = %error.message, "Fetch failed");
                    entry.fail(error);
                }
            }
            if entry.refetch_pending {
                entry.is_stale = true;
            }
            entry.refetch_pending && entry.subscribers > 0
        };

        self.emit(key, Change::Updated);
        if refetch {
            tracing::debug!(%key, "Invalidated while in flight; refetching");
            self.emit(key, Change::Invalidated);
        }
        Resolution::Applied { refetch }
    }

    /// Releases the in-flight marker of a fetch that will never resolve.
    ///
    /// The entry returns to the status it had before the fetch. Remaining
    /// subscribers are told to refetch, since the fetch they joined is gone.
    pub fn abandon_fetch(&self, key: &QueryKey, generation: u64) {
        let change = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return;
            };
            if entry.in_flight != Some(generation) {
                return;
            }
            entry.in_flight = None;
            entry.status = entry.status_before_fetch;
            entry.touch();
            if entry.subscribers > 0 {
                entry.refetch_pending = true;
                Change::Invalidated
            } else {
                Change::Updated
            }
        };
        tracing::debug!(%key, generation, "Fetch abandoned");
        self.emit(key, change);
    }

    /// Marks entries stale.
    ///
    /// Subscribed entries are told to refetch (or, if a fetch is in flight,
    /// refetch once it lands); unsubscribed entries drop their value so the
    /// next subscriber fetches from scratch. Repeating an invalidation that
    /// has not been acted on yet is a no-op. Returns how many entries changed.
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a QueryKey>) -> usize {
        let mut changed = 0;
        for key in keys {
            let change = {
                let Some(mut entry) = self.inner.entries.get_mut(key) else {
                    continue;
                };
                if entry.in_flight.is_some() {
                    entry.refetch_pending = true;
                    None
                } else if entry.subscribers == 0 {
                    if entry.value.is_none() && entry.status == Status::Idle {
                        None
                    } else {
                        entry.discard();
                        Some(Change::Updated)
                    }
                } else if entry.refetch_pending {
                    None
                } else {
                    entry.refetch_pending = true;
                    entry.mark_stale();
                    Some(Change::Invalidated)
                }
            };

            if let Some(change) = change {
                tracing::debug!(%key, ?change, "Entry invalidated");
                self.emit(key, change);
                changed += 1;
            }
        }
        changed
    }

    /// Keys of every entry whose attached tags intersect `tags`.
    #[must_use]
    pub fn keys_with_tags(&self, tags: &TagSet) -> Vec<QueryKey> {
        self.inner
            .entries
            .iter()
            .filter(|entry| !entry.tags.is_disjoint(tags))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Registers a subscriber on `key`. The entry is released when the
    /// returned guard is dropped.
    pub fn acquire(&self, key: &QueryKey) -> SubscriptionGuard {
        {
            let mut entry = self.inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
            entry.subscribers += 1;
            entry.release_epoch += 1;
            tracing::trace!(%key, subscribers = entry.subscribers, "Subscriber acquired");
        }
        SubscriptionGuard {
            store: self.clone(),
            key: key.clone(),
        }
    }

    fn release(&self, key: &QueryKey) {
        let epoch = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return;
            };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            tracing::trace!(%key, subscribers = entry.subscribers, "Subscriber released");
            if entry.subscribers > 0 {
                return;
            }
            // A refetch request is owed to subscribers; none are left.
            if entry.in_flight.is_none() {
                entry.refetch_pending = false;
            }
            entry.release_epoch
        };

        if self.inner.config.cache_time.is_zero() || !self.spawn_eviction(key, epoch) {
            self.evict_if_unused(key, epoch);
        }
    }

    /// Evicts `key` after `cache_time` unless it is acquired again in the
    /// meantime. Returns `false` when there is no tokio runtime to run the
    /// timer on.
    fn spawn_eviction(&self, key: &QueryKey, epoch: u64) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let cache_time = self.inner.config.cache_time;
        let store = self.clone();
        let key = key.clone();
        handle.spawn(async move {
            tokio::time::sleep(cache_time).await;
            store.evict_if_unused(&key, epoch);
        });
        true
    }

    /// Removes `key` if nobody re-subscribed since the release at `epoch`.
    fn evict_if_unused(&self, key: &QueryKey, epoch: u64) -> bool {
        let removed = self
            .inner
            .entries
            .remove_if(key, |_, entry| entry.subscribers == 0 && entry.release_epoch == epoch)
            .is_some();
        if removed {
            tracing::debug!(%key, "Entry evicted");
            self.emit(key, Change::Evicted);
        }
        removed
    }

    /// Writes a value directly, as if a fetch had succeeded. Existing tags
    /// are kept. An entry nobody is subscribed to is evicted `cache_time`
    /// after its last write.
    pub fn set_data(&self, key: &QueryKey, value: Value) {
        let unused = {
            let mut entry = self.inner.entries.entry(key.clone()).or_insert_with(CacheEntry::new);
            let tags = entry.tags.clone();
            entry.update(value, &tags);
            (entry.subscribers == 0).then(|| {
                entry.release_epoch += 1;
                entry.release_epoch
            })
        };
        self.emit(key, Change::Updated);
        if let Some(epoch) = unused {
            self.spawn_eviction(key, epoch);
        }
    }

    /// Layers an optimistic patch over `key`'s value. Returns `None` if the
    /// entry does not exist.
    pub(crate) fn push_overlay(&self, key: &QueryKey, patch: Patch) -> Option<u64> {
        let id = {
            let mut entry = self.inner.entries.get_mut(key)?;
            let id = self.inner.overlays.fetch_add(1, Ordering::Relaxed);
            entry.overlays.push(Overlay { id, patch });
            entry.touch();
            id
        };
        self.emit(key, Change::Updated);
        Some(id)
    }

    pub(crate) fn remove_overlay(&self, key: &QueryKey, id: u64) -> bool {
        let removed = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return false;
            };
            let before = entry.overlays.len();
            entry.overlays.retain(|overlay| overlay.id != id);
            let removed = entry.overlays.len() != before;
            if removed {
                entry.touch();
            }
            removed
        };
        if removed {
            self.emit(key, Change::Updated);
        }
        removed
    }

    /// Folds overlay `id` into the stored value and marks the entry stale.
    ///
    /// Used once the server has accepted the change the overlay predicted,
    /// so the patched value stays visible until the refetch lands.
    pub(crate) fn commit_overlay(&self, key: &QueryKey, id: u64) -> bool {
        let committed = {
            let Some(mut entry) = self.inner.entries.get_mut(key) else {
                return false;
            };
            let Some(position) = entry.overlays.iter().position(|overlay| overlay.id == id) else {
                return false;
            };
            let overlay = entry.overlays.remove(position);
            if let Some(value) = entry.value.take() {
                entry.value = Some((overlay.patch)(&value));
            }
            entry.is_stale = true;
            entry.touch();
            true
        };
        if committed {
            self.emit(key, Change::Updated);
        }
        committed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn emit(&self, key: &QueryKey, change: Change) {
        // No receivers is fine: nobody is bound to the cache yet.
        let _ = self.inner.events.send(CacheEvent {
            key: key.clone(),
            change,
        });
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(QueryConfig::default())
    }
}

/// Ownership of an in-flight fetch.
///
/// Dropping the guard without calling [`complete`](Self::complete) (for
/// example because the fetching task was cancelled) abandons the fetch.
#[derive(Debug)]
pub struct FetchGuard {
    store: CacheStore,
    key: QueryKey,
    generation: u64,
    armed: bool,
}

impl FetchGuard {
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves the fetch with `result`.
    pub fn complete(mut self, result: TransportResult, tags: &TagSet) -> Resolution {
        self.armed = false;
        self.store.resolve(&self.key, self.generation, result, tags)
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.armed {
            self.store.abandon_fetch(&self.key, self.generation);
        }
    }
}

/// A live subscription on one entry. Released on drop.
#[derive(Debug)]
pub struct SubscriptionGuard {
    store: CacheStore,
    key: QueryKey,
}

impl SubscriptionGuard {
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.store.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Tag;
    use serde_json::json;
    use std::time::Duration;

    fn key(id: u64) -> QueryKey {
        QueryKey::new("getFlashcard", &json!({ "id": id }))
    }

    fn tags() -> TagSet {
        TagSet::from([Tag::Flashcard])
    }

    fn perform(store: &CacheStore, key: &QueryKey) -> FetchGuard {
        match store.begin_fetch(key) {
            FetchTicket::Perform(guard) => guard,
            FetchTicket::Join => panic!("expected to own the fetch"),
        }
    }

    #[test]
    fn test_get_or_create_is_idle() {
        let store = CacheStore::default();
        let snapshot = store.get_or_create(&key(1));
        assert_eq!(snapshot.status, Status::Idle);
        assert!(snapshot.value.is_none());
        assert_eq!(store.len(), 1);

        // Second call returns the same entry.
        store.get_or_create(&key(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_begin_fetch_dedupes() {
        let store = CacheStore::default();
        let k = key(1);
        let guard = perform(&store, &k);
        assert!(matches!(store.begin_fetch(&k), FetchTicket::Join));
        assert!(!store.should_fetch(&k));

        assert_eq!(guard.complete(Ok(json!({"id": 1})), &tags()), Resolution::Applied { refetch: false });
        let snapshot = store.snapshot(&k).expect("entry exists");
        assert_eq!(snapshot.status, Status::Success);
        assert_eq!(snapshot.value, Some(json!({"id": 1})));
        assert_eq!(snapshot.tags, tags());
        assert!(!snapshot.is_fetching);

        // A new fetch may start once the first has resolved.
        assert!(matches!(store.begin_fetch(&k), FetchTicket::Perform(_)));
    }

    #[test]
    fn test_failure_keeps_last_value() {
        let store = CacheStore::default();
        let k = key(1);
        perform(&store, &k).complete(Ok(json!("cached")), &tags());
        perform(&store, &k).complete(Err(TransportError::disconnected()), &tags());

        let snapshot = store.snapshot(&k).expect("entry exists");
        assert_eq!(snapshot.status, Status::Error);
        assert_eq!(snapshot.value, Some(json!("cached")));
        assert_eq!(snapshot.error.map(|e| e.status), Some(0));
        assert!(store.should_fetch(&k));
    }

    #[test]
    fn test_stale_generation_is_discarded() {
        let store = CacheStore::default();
        let k = key(1);
        let guard = perform(&store, &k);
        let generation = guard.generation();
        drop(guard);

        assert_eq!(store.resolve(&k, generation, Ok(json!(1)), &tags()), Resolution::Discarded);
        let snapshot = store.snapshot(&k).expect("entry exists");
        assert_eq!(snapshot.status, Status::Idle);
        assert!(snapshot.value.is_none());
    }

    #[test]
    fn test_abandon_restores_previous_status() {
        let store = CacheStore::default();
        let k = key(1);
        perform(&store, &k).complete(Ok(json!(1)), &tags());

        let guard = perform(&store, &k);
        assert_eq!(store.snapshot(&k).map(|s| s.status), Some(Status::Loading));
        drop(guard);

        let snapshot = store.snapshot(&k).expect("entry exists");
        assert_eq!(snapshot.status, Status::Success);
        assert_eq!(snapshot.value, Some(json!(1)));
        assert!(!snapshot.is_fetching);
    }

    #[tokio::test]
    async fn test_abandon_with_subscribers_requests_refetch() {
        let store = CacheStore::default();
        let k = key(1);
        let _sub = store.acquire(&k);
        let mut events = store.subscribe();

        drop(perform(&store, &k));

        let mut changes = vec![];
        while let Ok(event) = events.try_recv() {
            changes.push(event.change);
        }
        assert_eq!(changes, vec![Change::Updated, Change::Invalidated]);
        assert!(store.should_fetch(&k));
    }

    #[tokio::test]
    async fn test_invalidate_subscribed_entry() {
        let store = CacheStore::default();
        let k = key(1);
        let _sub = store.acquire(&k);
        perform(&store, &k).complete(Ok(json!(1)), &tags());
        let mut events = store.subscribe();

        assert_eq!(store.invalidate([&k]), 1);
        let after_first = store.snapshot(&k).expect("entry exists");
        assert!(after_first.is_stale);
        assert_eq!(after_first.value, Some(json!(1)), "stale data stays visible");

        // Idempotent: a second invalidation changes nothing.
        assert_eq!(store.invalidate([&k]), 0);
        assert_eq!(store.snapshot(&k), Some(after_first));

        let event = events.try_recv().expect("one event");
        assert_eq!(event.change, Change::Invalidated);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_invalidate_unsubscribed_entry_discards_value() {
        let store = CacheStore::new(QueryConfig::new(Duration::from_secs(60), Duration::from_secs(60)));
        let k = key(1);
        perform(&store, &k).complete(Ok(json!(1)), &tags());

        assert_eq!(store.invalidate([&k]), 1);
        let snapshot = store.snapshot(&k).expect("entry kept until eviction");
        assert_eq!(snapshot.status, Status::Idle);
        assert!(snapshot.value.is_none());
        assert!(snapshot.tags.is_empty());

        assert_eq!(store.invalidate([&k]), 0);
    }

    #[tokio::test]
    async fn test_invalidate_after_abandoned_refetch_discards_value() {
        let store = CacheStore::default();
        let k = key(1);
        perform(&store, &k).complete(Ok(json!(1)), &tags());

        // A binding unmounts during its background refetch: the fetch is
        // abandoned while it still counts as a subscriber, then it leaves.
        let sub = store.acquire(&k);
        let guard = perform(&store, &k);
        drop(guard);
        drop(sub);

        assert_eq!(store.invalidate([&k]), 1);
        let snapshot = store.snapshot(&k).expect("entry kept until eviction");
        assert_eq!(snapshot.status, Status::Idle);
        assert!(snapshot.value.is_none(), "nobody may see the pre-mutation value");
        assert_eq!(store.invalidate([&k]), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacquired_entries_are_evicted() {
        let store = CacheStore::new(QueryConfig::new(Duration::from_secs(60), Duration::from_secs(5)));
        let created = key(1);
        let written = key(2);
        store.get_or_create(&created);
        store.set_data(&written, json!({"id": 2}));

        tokio::time::sleep(Duration::from_secs(3)).await;
        // Writing again restarts the grace period.
        store.set_data(&written, json!({"id": 2, "mastered": true}));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.snapshot(&created).is_none());
        assert!(store.snapshot(&written).is_some());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquired_entry_outlives_creation_timer() {
        let store = CacheStore::new(QueryConfig::new(Duration::from_secs(60), Duration::from_secs(5)));
        let k = key(1);
        store.get_or_create(&k);
        let _sub = store.acquire(&k);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.snapshot(&k).is_some());
    }

    #[test]
    fn test_invalidate_in_flight_refetches_after_resolve() {
        let store = CacheStore::default();
        let k = key(1);
        let _sub = store.acquire(&k);
        let guard = perform(&store, &k);

        assert_eq!(store.invalidate([&k]), 0, "in-flight entries are flagged, not notified");
        assert_eq!(guard.complete(Ok(json!(1)), &tags()), Resolution::Applied { refetch: true });
        let snapshot = store.snapshot(&k).expect("entry exists");
        assert!(snapshot.is_stale);
        assert!(store.should_fetch(&k));
    }

    #[test]
    fn test_keys_with_tags_only_matches_provided_tags() {
        let store = CacheStore::default();
        let flashcard = key(1);
        let categories = QueryKey::new("getCategories", &Value::Null);
        perform(&store, &flashcard).complete(Ok(json!(1)), &tags());
        perform(&store, &categories).complete(Ok(json!([])), &TagSet::from([Tag::Category]));
        store.get_or_create(&key(2));

        assert_eq!(store.keys_with_tags(&tags()), vec![flashcard]);
        assert!(store.keys_with_tags(&TagSet::from([Tag::Analysis])).is_empty());
    }

    #[tokio::test]
    async fn test_events_stream() {
        let store = CacheStore::default();
        let k = key(1);
        let mut events = Box::pin(store.events());

        perform(&store, &k).complete(Ok(json!(1)), &tags());

        let started = events.next().await.expect("fetch started event");
        assert_eq!(started, CacheEvent { key: k.clone(), change: Change::Updated });
        let resolved = events.next().await.expect("fetch resolved event");
        assert_eq!(resolved.key, k);
    }

    #[test]
    fn test_zero_cache_time_evicts_immediately() {
        let store = CacheStore::new(QueryConfig::new(Duration::ZERO, Duration::ZERO));
        let k = key(1);
        let first = store.acquire(&k);
        let second = store.acquire(&k);
        drop(first);
        assert_eq!(store.snapshot(&k).map(|s| s.subscribers), Some(1));
        drop(second);
        assert!(store.snapshot(&k).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_after_grace_period() {
        let store = CacheStore::new(QueryConfig::new(Duration::from_secs(60), Duration::from_secs(5)));
        let k = key(1);
        perform(&store, &k).complete(Ok(json!(1)), &tags());

        drop(store.acquire(&k));
        tokio::time::sleep(Duration::from_secs(2)).await;
        // Re-subscribing within the grace period keeps the entry.
        let sub = store.acquire(&k);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.snapshot(&k).is_some());

        drop(sub);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.snapshot(&k).is_none());
        assert!(store.should_fetch(&k), "a new subscriber must fetch fresh data");
    }

    #[test]
    fn test_overlays() {
        let store = CacheStore::default();
        let k = key(1);
        assert!(store.push_overlay(&k, Arc::new(|v| v.clone())).is_none());

        store.set_data(&k, json!({"mastered": false}));
        let id = store
            .push_overlay(&k, Arc::new(|_| json!({"mastered": true})))
            .expect("entry exists");
        assert_eq!(store.snapshot(&k).and_then(|s| s.value), Some(json!({"mastered": true})));

        assert!(store.remove_overlay(&k, id));
        assert!(!store.remove_overlay(&k, id));
        assert_eq!(store.snapshot(&k).and_then(|s| s.value), Some(json!({"mastered": false})));
    }

    #[test]
    fn test_commit_overlay_keeps_patched_value() {
        let store = CacheStore::default();
        let k = key(1);
        perform(&store, &k).complete(Ok(json!({"mastered": false})), &tags());
        let id = store
            .push_overlay(&k, Arc::new(|_| json!({"mastered": true})))
            .expect("entry exists");

        assert!(store.commit_overlay(&k, id));
        assert!(!store.commit_overlay(&k, id));
        let snapshot = store.snapshot(&k).expect("entry exists");
        assert_eq!(snapshot.value, Some(json!({"mastered": true})));
        assert!(snapshot.is_stale);
        assert!(!store.remove_overlay(&k, id));
    }
}
