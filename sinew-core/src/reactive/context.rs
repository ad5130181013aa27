//! Reactive Context
//!
//! The reactive context records which computation is currently running, so
//! that reads can register it as a subscriber. Unlike a thread-local stack,
//! the active subscriber is part of each graph's own state: two graphs never
//! see each other's computations.
//!
//! Both guards here restore state when dropped, including during unwinding,
//! so a panicking computation cannot leave the graph believing it is still
//! tracking or still batching.

use std::sync::Arc;

use tracing::debug;

use super::runtime::Inner;
use crate::graph::NodeKey;

/// Guard that swaps the active subscriber and puts the previous one back
/// when dropped.
pub(crate) struct ActiveSubscriber<'a> {
    graph: &'a Inner,
    previous: Option<NodeKey>,
}

impl<'a> ActiveSubscriber<'a> {
    /// Make `key` the active subscriber. `None` suspends tracking.
    pub(crate) fn enter(graph: &'a Inner, key: Option<NodeKey>) -> Self {
        let previous = graph.with(|state| std::mem::replace(&mut state.active, key));
        Self { graph, previous }
    }
}

impl Drop for ActiveSubscriber<'_> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.graph.with(|state| state.active = previous);
    }
}

/// Guard returned by [`ReactiveGraph::start_batch`](crate::ReactiveGraph::start_batch).
///
/// Effects scheduled while any batch guard is alive are deferred. Dropping
/// the last one drains the queue, unless the thread is unwinding, in which
/// case the queue is left for the next write or [`flush`](crate::ReactiveGraph::flush).
///
/// The batch belongs to the graph, not to the thread that opened it: while
/// the guard is alive, writes from every thread are deferred, and their
/// effects run on whichever thread drops the last guard.
#[must_use = "the batch ends as soon as the guard is dropped"]
pub struct BatchGuard {
    graph: Arc<Inner>,
}

impl BatchGuard {
    pub(crate) fn new(graph: Arc<Inner>) -> Self {
        graph.with(|state| state.batch_depth += 1);
        Self { graph }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let (depth, queued) = self.graph.with(|state| {
            state.batch_depth = state.batch_depth.saturating_sub(1);
            (state.batch_depth, state.queue.len())
        });
        if depth == 0 {
            if std::thread::panicking() {
                debug!(queued, "batch unwound; pending effects left queued");
            } else {
                debug!(queued, "batch closed");
                self.graph.flush();
            }
        }
    }
}

impl std::fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGuard").finish_non_exhaustive()
    }
}
