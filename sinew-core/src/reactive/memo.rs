//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When a direct input changes, the memo is marked dirty. When something
//!    further upstream changes, it is only marked "maybe dirty".
//!
//! 3. On the next access, a maybe-dirty memo asks its inputs, recursively,
//!    whether any of them actually produced a new value. Only then does it
//!    recompute; otherwise the cache is trusted again.
//!
//! 4. A recomputation that yields the same value as before does not disturb
//!    anything downstream.
//!
//! # Why This Matters
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually read will recompute
//! - Memos that are never read stay dirty (no wasted work)
//!
//! # Failures
//!
//! A computation that panics leaves the memo marked failed. The panic
//! reaches the reader, and the next read tries again. Reading a memo from
//! inside its own computation, directly or through other memos, is reported
//! as [`ReactiveError::CyclicDependency`].

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::runtime::NodeOwner;
use crate::error::ReactiveError;
use crate::graph::{Flags, GraphState, NodeId, NodeKey};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use sinew_core::{MemoState, ReactiveGraph};
///
/// let graph = ReactiveGraph::new();
/// let width = graph.signal(3);
/// let area = graph.memo({
///     let width = width.clone();
///     move || width.get() * width.get()
/// });
///
/// assert_eq!(area.state(), MemoState::Dirty);
/// assert_eq!(area.get(), 9);
/// assert_eq!(area.state(), MemoState::Clean);
/// ```
pub struct Memo<T> {
    owner: Arc<NodeOwner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(owner: NodeOwner) -> Self {
        Self {
            owner: Arc::new(owner),
            _marker: PhantomData,
        }
    }

    /// Get the memo's node id.
    pub fn id(&self) -> NodeId {
        self.owner.id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the computation panics, and with a [`ReactiveError`]
    /// payload on a cycle or after the graph was shut down.
    pub fn get(&self) -> T {
        self.try_get()
            .unwrap_or_else(|err| panic::panic_any(err))
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Graph errors raised anywhere below this read, including inside the
    /// computations of other memos, are returned as `Err`. Other panics
    /// from a computation continue unwinding.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        let graph = self.owner.graph()?;
        catch_graph_error(|| graph.read_memo(self.id()))
    }

    /// Get the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.try_get_untracked()
            .unwrap_or_else(|err| panic::panic_any(err))
    }

    fn try_get_untracked(&self) -> Result<T, ReactiveError> {
        let graph = self.owner.graph()?;
        catch_graph_error(|| graph.untracked(|| graph.read_memo(self.id())))
    }

    /// Whether the cached value can be returned without any work.
    ///
    /// A memo whose graph is gone reports [`MemoState::Dirty`].
    pub fn state(&self) -> MemoState {
        self.inspect(|state, key| {
            let node = &state.nodes[key];
            if node.needs_compute() {
                MemoState::Dirty
            } else if node.flags.contains(Flags::PENDING) {
                MemoState::MaybeDirty
            } else {
                MemoState::Clean
            }
        })
        .unwrap_or(MemoState::Dirty)
    }

    /// Whether a computation has completed at least once.
    pub fn has_value(&self) -> bool {
        self.inspect(|state, key| state.nodes[key].value().is_some())
            .unwrap_or(false)
    }

    /// Number of memos and effects currently reading this memo.
    pub fn subscriber_count(&self) -> usize {
        self.inspect(|state, key| state.subscriber_count(key))
            .unwrap_or(0)
    }

    /// Number of nodes read by the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inspect(|state, key| state.dependency_count(key))
            .unwrap_or(0)
    }

    fn inspect<R>(&self, f: impl FnOnce(&GraphState, NodeKey) -> R) -> Option<R> {
        self.owner.graph().ok()?.inspect(self.id(), f)
    }
}

/// Turn a [`ReactiveError`] panic payload back into an `Err`.
fn catch_graph_error<T>(read: impl FnOnce() -> Result<T, ReactiveError>) -> Result<T, ReactiveError> {
    match panic::catch_unwind(AssertUnwindSafe(read)) {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::ReactiveGraph;

    #[test]
    fn memo_computes_lazily() {
        let graph = ReactiveGraph::new();
        let count = Arc::new(AtomicUsize::new(0));
        let memo = graph.memo({
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                42
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!memo.has_value());

        assert_eq!(memo.get(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(memo.get(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_recomputes_after_input_changes() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let count = Arc::new(AtomicUsize::new(0));
        let memo = graph.memo({
            let a = a.clone();
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                a.get() * 10
            }
        });

        assert_eq!(memo.get(), 10);
        a.set(2);
        assert_eq!(memo.state(), MemoState::Dirty);
        assert_eq!(memo.get(), 20);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_intermediate_stops_recomputation() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(2);
        let parity = graph.memo({
            let a = a.clone();
            move || a.get() % 2
        });
        let count = Arc::new(AtomicUsize::new(0));
        let label = graph.memo({
            let parity = parity.clone();
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                if parity.get() == 0 { "even" } else { "odd" }
            }
        });

        assert_eq!(label.get(), "even");
        a.set(4);
        assert_eq!(label.state(), MemoState::MaybeDirty);
        assert_eq!(label.get(), "even");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(label.state(), MemoState::Clean);
    }

    #[test]
    fn dependencies_follow_the_last_run() {
        let graph = ReactiveGraph::new();
        let flag = graph.signal(true);
        let a = graph.signal(1);
        let b = graph.signal(2);
        let pick = graph.memo({
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            move || if flag.get() { a.get() } else { b.get() }
        });

        assert_eq!(pick.get(), 1);
        assert_eq!(pick.dependency_count(), 2);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(pick.get(), 2);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn self_read_is_a_cycle() {
        let graph = ReactiveGraph::new();
        let slot: Arc<parking_lot::Mutex<Option<Memo<i32>>>> = Arc::default();
        let memo = graph.memo({
            let slot = slot.clone();
            move || {
                let me = slot.lock().clone();
                me.map_or(0, |me| me.get() + 1)
            }
        });
        *slot.lock() = Some(memo.clone());

        let err = memo.try_get().unwrap_err();
        assert!(err.is_cycle());
        assert_eq!(memo.state(), MemoState::Dirty);

        // Break the reference cycle between the memo and its own closure.
        slot.lock().take();
    }

    #[test]
    fn panicking_computation_retries_on_next_read() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(0);
        let memo = graph.memo({
            let a = a.clone();
            move || {
                let value = a.get();
                assert!(value != 1, "one is not allowed");
                value
            }
        });

        assert_eq!(memo.get(), 0);
        a.set(1);
        let result = panic::catch_unwind(AssertUnwindSafe(|| memo.get()));
        assert!(result.is_err());
        assert_eq!(memo.state(), MemoState::Dirty);

        a.set(2);
        assert_eq!(memo.get(), 2);
    }

    #[test]
    fn equality_runs_outside_the_graph_borrow() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let step = graph.signal(10);
        let bucket = graph.memo_with(
            {
                let a = a.clone();
                move || a.get()
            },
            {
                let step = step.clone();
                move |x: &i32, y: &i32| x / step.get() == y / step.get()
            },
        );
        let count = Arc::new(AtomicUsize::new(0));
        let reader = graph.memo({
            let bucket = bucket.clone();
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                bucket.get()
            }
        });

        assert_eq!(reader.get(), 1);
        a.set(5);
        assert_eq!(reader.get(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        a.set(12);
        assert_eq!(reader.get(), 12);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(step.subscriber_count(), 0);
    }

    #[test]
    fn nan_results_count_as_unchanged() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1.0_f64);
        let nan = graph.memo({
            let a = a.clone();
            move || a.get() * f64::NAN
        });
        let count = Arc::new(AtomicUsize::new(0));
        let reader = graph.memo({
            let nan = nan.clone();
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                nan.get().is_nan()
            }
        });

        assert!(reader.get());
        a.set(2.0);
        assert!(reader.get());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
