//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When a dependency changes, the effect is queued. It runs when the
//!    outermost write or batch completes, and only if one of its inputs
//!    really produced a new value.
//!
//! 3. Every run re-records the dependencies from scratch.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos are freed with their last handle; effects live until stopped.
//!
//! # Ownership
//!
//! An effect created while another effect runs belongs to that effect. The
//! next run of the outer effect discards it (and typically creates a fresh
//! one), and stopping the outer effect stops it too. A [`Scope`] groups
//! effects the same way without doing any tracking of its own.

use std::fmt;
use std::sync::Weak;

use super::runtime::{upgrade, Inner};
use crate::graph::{GraphState, NodeId, NodeKey};

/// A side-effecting computation that runs when dependencies change.
///
/// The handle does not keep the effect alive; dropping it leaves the
/// effect running. Call [`stop`](Self::stop) to end it.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
///
/// use sinew_core::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.signal(0);
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let effect = graph.effect({
///     let count = count.clone();
///     let log = log.clone();
///     move || log.lock().unwrap().push(count.get())
/// });
///
/// count.set(5);
/// effect.stop();
/// count.set(6);
/// assert_eq!(*log.lock().unwrap(), vec![0, 5]);
/// ```
#[derive(Clone)]
pub struct Effect {
    graph: Weak<Inner>,
    id: NodeId,
}

impl Effect {
    pub(crate) fn new(graph: Weak<Inner>, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stop the effect and every effect it owns.
    ///
    /// An effect that stops itself from inside its own run finishes that
    /// run first. Stopping twice does nothing.
    pub fn stop(&self) {
        if let Ok(graph) = upgrade(&self.graph, self.id) {
            graph.dispose(self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        upgrade(&self.graph, self.id).map_or(true, |graph| graph.is_disposed(self.id))
    }

    /// How many times the effect body has been entered, including runs
    /// that panicked.
    pub fn run_count(&self) -> usize {
        self.inspect(|state, key| state.nodes[key].runs)
    }

    /// Number of signals and memos read by the last run.
    ///
    /// Effects owned by this one are not counted.
    pub fn dependency_count(&self) -> usize {
        self.inspect(|state, key| {
            let mut count = 0;
            let mut cursor = state.nodes[key].deps;
            while let Some(id) = cursor {
                if !state.nodes[state.links[id].dep].is_sink() {
                    count += 1;
                }
                cursor = state.links[id].next_dep;
            }
            count
        })
    }

    fn inspect(&self, f: impl FnOnce(&GraphState, NodeKey) -> usize) -> usize {
        upgrade(&self.graph, self.id)
            .ok()
            .and_then(|graph| graph.inspect(self.id, f))
            .unwrap_or(0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("runs", &self.run_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A group of effects that can be stopped together.
///
/// ```rust
/// use sinew_core::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let a = graph.signal(1);
///
/// let scope = graph.scope(|| {
///     let a = a.clone();
///     graph.effect(move || {
///         a.get();
///     });
/// });
/// assert_eq!(a.subscriber_count(), 1);
///
/// scope.stop();
/// assert_eq!(a.subscriber_count(), 0);
/// ```
#[derive(Clone)]
pub struct Scope {
    graph: Weak<Inner>,
    id: NodeId,
}

impl Scope {
    pub(crate) fn new(graph: Weak<Inner>, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Run `f` with this scope as the owner of any effect it creates.
    ///
    /// Returns `None` without running `f` if the scope was stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        upgrade(&self.graph, self.id).ok()?.run_in_scope(self.id, f)
    }

    /// Stop every effect in the scope.
    pub fn stop(&self) {
        if let Ok(graph) = upgrade(&self.graph, self.id) {
            graph.dispose(self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        upgrade(&self.graph, self.id).map_or(true, |graph| graph.is_disposed(self.id))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
