//! Subscriptions: long-lived sources of messages tied to a rendering unit.
//!
//! A subscription is how a rendering unit *binds* to something that keeps
//! producing values over time. Cache bindings ([`Query`](crate::query::Query))
//! are subscriptions: the [`SubscriptionManager`] starts one when it first
//! appears in `Application::subscriptions` (mount) and cancels it when it
//! disappears (unmount). Cancelling drops the underlying stream, which in
//! turn releases the cache entry it acquired and aborts any fetch it owns.
//!
//! Subscriptions are identified by [`SubscriptionId`]. Two subscriptions with
//! the same id are the same binding; the manager keeps the running one and
//! ignores the newcomer.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of a subscription: the source type plus a hash of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    source: TypeId,
    hash: u64,
}

impl SubscriptionId {
    /// Builds an id for a source of type `T` whose parameters hash to `hash`.
    #[must_use]
    pub fn of<T: 'static>(hash: u64) -> Self {
        Self {
            source: TypeId::of::<T>(),
            hash,
        }
    }

    /// The id of this subscription once its output is mapped through `F`.
    #[must_use]
    pub fn mapped<F: 'static>(self) -> Self {
        let mut hasher = DefaultHasher::new();
        (self.hash, TypeId::of::<F>()).hash(&mut hasher);
        Self {
            source: self.source,
            hash: hasher.finish(),
        }
    }
}

/// Something that can be turned into a stream of values.
pub trait SubscriptionSource: Send + 'static {
    type Output;

    /// Creates the stream. Called once per start of the subscription.
    fn stream(&self) -> BoxStream<'static, Self::Output>;

    /// Stable identity used to diff subscriptions between updates.
    fn id(&self) -> SubscriptionId;
}

/// A type-erased subscription producing messages of type `Msg`.
pub struct Subscription<Msg> {
    pub(crate) id: SubscriptionId,
    pub(crate) spawn: Box<dyn FnOnce() -> BoxStream<'static, Msg> + Send>,
}

impl<Msg: Send + 'static> Subscription<Msg> {
    /// Wraps a source.
    pub fn new<S>(source: S) -> Self
    where
        S: SubscriptionSource<Output = Msg>,
    {
        Self {
            id: source.id(),
            spawn: Box::new(move || source.stream()),
        }
    }

    /// Converts every value produced by this subscription.
    ///
    /// The mapper's type becomes part of the id, so the same source mapped
    /// into two different messages runs as two bindings.
    pub fn map<NewMsg, F>(self, f: F) -> Subscription<NewMsg>
    where
        NewMsg: Send + 'static,
        F: Fn(Msg) -> NewMsg + Send + Sync + 'static,
    {
        let spawn = self.spawn;
        Subscription {
            id: self.id.mapped::<F>(),
            spawn: Box::new(move || spawn().map(f).boxed()),
        }
    }

    /// Returns the identity of this subscription.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Handle for a running subscription task.
pub struct Handle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Handle {
    pub fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Signals cancellation and aborts the task without waiting for it.
    pub fn stop(&self) {
        self.token.cancel();
        self.join.abort();
    }

    /// Cancel the subscription and wait for task completion.
    pub async fn cancel(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Starts, keeps and stops subscriptions as the application's set changes.
pub struct SubscriptionManager<Msg> {
    tx: mpsc::UnboundedSender<Msg>,
    running: HashMap<SubscriptionId, Handle>,
}

impl<Msg: Send + 'static> SubscriptionManager<Msg> {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self {
            tx,
            running: HashMap::new(),
        }
    }

    /// Diffs `subscriptions` against the running set.
    ///
    /// New ids are spawned, ids no longer present are cancelled, and ids that
    /// are still present keep running untouched. Must be called from within a
    /// tokio runtime.
    pub fn update(&mut self, subscriptions: impl IntoIterator<Item = Subscription<Msg>>) {
        let mut wanted = HashSet::new();

        for subscription in subscriptions {
            if !wanted.insert(subscription.id) || self.running.contains_key(&subscription.id) {
                continue;
            }
            let handle = self.spawn(subscription.spawn);
            self.running.insert(subscription.id, handle);
        }

        self.running.retain(|id, handle| {
            let keep = wanted.contains(id);
            if !keep {
                tracing::trace!(?id, "Subscription removed; cancelling");
                handle.stop();
            }
            keep
        });
    }

    /// Number of running subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.running.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Cancels every subscription and waits for their tasks to finish.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.cancel().await;
        }
    }

    fn spawn(&self, spawn: Box<dyn FnOnce() -> BoxStream<'static, Msg> + Send>) -> Handle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();

        let join = tokio::spawn(async move {
            let mut stream = spawn();
            loop {
                tokio::select! {
                    biased;
                    () = cancelled.cancelled() => break,
                    next = stream.next() => match next {
                        Some(msg) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // Dropping the stream here releases whatever the source acquired.
            drop(stream);
        });

        Handle::new(token, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, timeout};

    struct Counter {
        label: u64,
        dropped: Arc<AtomicUsize>,
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SubscriptionSource for Counter {
        type Output = u64;

        fn stream(&self) -> BoxStream<'static, u64> {
            let flag = DropFlag(self.dropped.clone());
            let label = self.label;
            stream::once(async move { label })
                .chain(stream::unfold(flag, |flag| async move {
                    futures::future::pending::<()>().await;
                    Some((0, flag))
                }))
                .boxed()
        }

        fn id(&self) -> SubscriptionId {
            SubscriptionId::of::<Self>(self.label)
        }
    }

    fn counter(label: u64, dropped: &Arc<AtomicUsize>) -> Subscription<u64> {
        Subscription::new(Counter {
            label,
            dropped: dropped.clone(),
        })
    }

    #[test]
    fn test_id_depends_on_type_and_hash() {
        assert_eq!(SubscriptionId::of::<u8>(1), SubscriptionId::of::<u8>(1));
        assert_ne!(SubscriptionId::of::<u8>(1), SubscriptionId::of::<u8>(2));
        assert_ne!(SubscriptionId::of::<u8>(1), SubscriptionId::of::<u16>(1));
    }

    fn label(n: u64) -> String {
        n.to_string()
    }

    fn shout(n: u64) -> String {
        format!("{n}!")
    }

    #[tokio::test]
    async fn test_map_id_depends_on_mapper() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let first = counter(7, &dropped).map(label);
        let second = counter(7, &dropped).map(label);
        let other = counter(7, &dropped).map(shout);
        assert_eq!(first.id(), second.id());
        assert_ne!(first.id(), other.id());
        assert_ne!(first.id(), counter(7, &dropped).id());

        let mut stream = (first.spawn)();
        assert_eq!(stream.next().await.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_same_source_mapped_twice_runs_twice() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut manager = SubscriptionManager::new(tx);

        manager.update(vec![counter(3, &dropped).map(label), counter(3, &dropped).map(shout)]);
        assert_eq!(manager.len(), 2);

        let mut seen = vec![];
        for _ in 0..2 {
            let msg = timeout(Duration::from_millis(200), rx.recv())
                .await
                .expect("message within timeout")
                .expect("channel open");
            seen.push(msg);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec!["3".to_string(), "3!".to_string()]);
    }

    #[tokio::test]
    async fn test_manager_starts_and_dedupes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut manager = SubscriptionManager::new(tx);

        manager.update(vec![counter(1, &dropped), counter(1, &dropped), counter(2, &dropped)]);
        assert_eq!(manager.len(), 2);

        let mut seen = vec![];
        for _ in 0..2 {
            let msg = timeout(Duration::from_millis(200), rx.recv())
                .await
                .expect("message within timeout")
                .expect("channel open");
            seen.push(msg);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);

        // Re-declaring the same set must not restart anything.
        manager.update(vec![counter(1, &dropped), counter(2, &dropped)]);
        assert!(
            timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
            "running subscriptions should not be restarted"
        );
    }

    #[tokio::test]
    async fn test_manager_cancels_removed_subscriptions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut manager = SubscriptionManager::new(tx);

        manager.update(vec![counter(1, &dropped), counter(2, &dropped)]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.update(vec![counter(2, &dropped)]);
        assert_eq!(manager.len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        manager.shutdown().await;
        assert!(manager.is_empty());
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }
}
