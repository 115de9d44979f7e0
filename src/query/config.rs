use std::time::Duration;

/// Configuration for cache behaviour.
///
/// This controls when cached data is considered stale and how long unused
/// entries linger before eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long data is considered fresh after a successful fetch.
    ///
    /// A binding that mounts on fresh data shows it without refetching. Once
    /// stale, mounting shows the cached data and refetches in the background.
    pub stale_time: Duration,

    /// Grace period before an entry with no subscribers is evicted.
    ///
    /// Re-subscribing within this window keeps the entry (and its data).
    /// `Duration::ZERO` evicts as soon as the last subscriber leaves.
    pub cache_time: Duration,

    /// Capacity of the change-notification channel. Subscribers that fall
    /// further behind than this re-read their entry instead of replaying.
    pub event_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(60),
            cache_time: Duration::from_secs(60),
            event_capacity: 256,
        }
    }
}

impl QueryConfig {
    /// Creates a configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            event_capacity: 256,
        }
    }

    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
