//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a memo or effect is running, that
//!    computation is recorded as a subscriber.
//!
//! 2. When a signal's value changes, every subscriber is flagged, and the
//!    effects among them are queued.
//!
//! 3. Unless a batch is open, the queue is drained before the write returns.
//!
//! A write with a value that is [the same](crate::same_value) as the
//! current one does nothing at all.

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use super::runtime::NodeOwner;
use crate::error::ReactiveError;
use crate::graph::NodeId;

/// A reactive signal holding a value of type `T`.
///
/// Clones share the same node. The node is freed when the last clone is
/// dropped.
///
/// # Example
///
/// ```rust
/// use sinew_core::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.signal(0);
///
/// count.set(5);
/// count.update(|n| n + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    owner: Arc<NodeOwner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(owner: NodeOwner) -> Self {
        Self {
            owner: Arc::new(owner),
            _marker: PhantomData,
        }
    }

    /// Get the signal's node id.
    pub fn id(&self) -> NodeId {
        self.owner.id()
    }

    /// Get the current value, subscribing the running memo or effect.
    ///
    /// # Panics
    ///
    /// Panics with a [`ReactiveError`] payload if the graph was shut down or
    /// dropped. Use [`try_get`](Self::try_get) to handle that case.
    pub fn get(&self) -> T {
        self.try_get()
            .unwrap_or_else(|err| std::panic::panic_any(err))
    }

    /// Get the current value, subscribing the running memo or effect.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.owner.graph()?.read_source(self.id())
    }

    /// Get the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.try_get_untracked()
            .unwrap_or_else(|err| std::panic::panic_any(err))
    }

    fn try_get_untracked(&self) -> Result<T, ReactiveError> {
        let graph = self.owner.graph()?;
        graph.untracked(|| graph.read_source(self.id()))
    }

    /// Set a new value and notify subscribers.
    ///
    /// Writing to a signal whose graph is gone is ignored.
    pub fn set(&self, value: T) {
        self.write(value, false);
    }

    /// Update the value using a function of the current one.
    ///
    /// The read and the write happen under one lock, so concurrent updates
    /// from other threads are never lost.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.report(
            self.owner
                .graph()
                .and_then(|graph| graph.update_source(self.id(), |current: T| f(&current), false)),
        );
    }

    /// Mutate the value in place. Subscribers are always notified, since a
    /// mutation cannot be compared against the value it replaced.
    pub fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let apply = |mut current: T| {
            f(&mut current);
            current
        };
        self.report(
            self.owner
                .graph()
                .and_then(|graph| graph.update_source(self.id(), apply, true)),
        );
    }

    fn write(&self, value: T, force: bool) {
        self.report(
            self.owner
                .graph()
                .and_then(|graph| graph.write_source(self.id(), value, force)),
        );
    }

    fn report(&self, result: Result<bool, ReactiveError>) {
        if let Err(err) = result {
            warn!(node = %self.id(), %err, "write ignored");
        }
    }

    /// Number of memos and effects currently reading this signal.
    pub fn subscriber_count(&self) -> usize {
        self.owner
            .graph()
            .ok()
            .and_then(|graph| graph.inspect(self.id(), |state, key| state.subscriber_count(key)))
            .unwrap_or(0)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.try_get_untracked().ok())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ReactiveGraph;

    #[test]
    fn signal_basic() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_set() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(0);
        signal.set(100);
        assert_eq!(signal.get(), 100);
    }

    #[test]
    fn signal_update() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(10);
        signal.update(|x| x * 2);
        assert_eq!(signal.get(), 20);
    }

    #[test]
    fn signal_clone_shares_state() {
        let graph = ReactiveGraph::new();
        let signal1 = graph.signal(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn node_lives_until_last_clone_drops() {
        let graph = ReactiveGraph::new();
        let signal1 = graph.signal("a".to_string());
        let signal2 = signal1.clone();

        drop(signal1);
        assert_eq!(graph.node_count(), 1);
        drop(signal2);
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn equal_write_notifies_nobody() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(1);
        let runs = std::sync::Arc::new(AtomicUsize::new(0));
        let _effect = graph.effect({
            let signal = signal.clone();
            let runs = runs.clone();
            move || {
                signal.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        signal.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn modify_always_notifies() {
        let graph = ReactiveGraph::new();
        let items = graph.signal(vec![1, 2]);
        let seen = std::sync::Arc::new(AtomicUsize::new(0));
        let _effect = graph.effect({
            let items = items.clone();
            let seen = seen.clone();
            move || seen.store(items.get().len(), Ordering::SeqCst)
        });

        items.modify(|v| v.push(3));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        items.modify(|_| {});
        assert_eq!(items.get(), vec![1, 2, 3]);
    }

    #[test]
    fn custom_equality_suppresses_writes() {
        let graph = ReactiveGraph::new();
        let name = graph.signal_with("Ada".to_string(), |a, b| a.eq_ignore_ascii_case(b));
        name.set("ADA".to_string());
        assert_eq!(name.get(), "Ada");
        name.set("Grace".to_string());
        assert_eq!(name.get(), "Grace");
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(1);
        let effect = graph.effect({
            let signal = signal.clone();
            move || {
                signal.get_untracked();
            }
        });
        assert_eq!(signal.subscriber_count(), 0);
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn equality_may_read_other_signals() {
        let graph = ReactiveGraph::new();
        let tolerance = graph.signal(2);
        let reading = graph.signal_with(10, {
            let tolerance = tolerance.clone();
            move |a: &i32, b: &i32| (a - b).abs() <= tolerance.get()
        });
        let runs = std::sync::Arc::new(AtomicUsize::new(0));
        let _effect = graph.effect({
            let reading = reading.clone();
            let runs = runs.clone();
            move || {
                reading.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        reading.set(11);
        assert_eq!(reading.get(), 10);
        reading.set(20);
        assert_eq!(reading.get(), 20);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(tolerance.subscriber_count(), 0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let graph = ReactiveGraph::new();
        let hits = graph.signal(0_u64);

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let hits = hits.clone();
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        hits.update(|n| n + 1);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hits.get(), 8_000);
    }

    #[test]
    fn debug_shows_value() {
        let graph = ReactiveGraph::new();
        let signal = graph.signal(7);
        let rendered = format!("{signal:?}");
        assert!(rendered.contains("Some(7)"));
    }
}
