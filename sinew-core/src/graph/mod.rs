//! Dependency Graph
//!
//! This module implements the node/edge model that tracks relationships
//! between reactive values and computations, and the algorithms that run
//! on it without calling user code.
//!
//! # Overview
//!
//! - Nodes represent sources (signals), derived values (memos), effects and
//!   scopes. They live in a slab arena and are addressed by index.
//! - Edges are [`Link`](link::Link) records, also in a slab. Each link sits
//!   in two intrusive doubly-linked lists at once: the subscriber's
//!   dependency list and the dependency's subscriber list.
//!
//! When a signal changes, [`GraphState::propagate`] walks subscriber lists
//! and flags everything downstream. Memos are pulled lazily by the runtime,
//! which uses the flags to decide whether a cached value can be trusted.
//!
//! # Design Decisions
//!
//! 1. Links instead of adjacency sets: a dependency set that is stable
//!    between runs is re-tracked by moving a cursor, with no allocation.
//!
//! 2. Traversals are iterative with explicit stacks, so graph depth never
//!    turns into call-stack depth.
//!
//! 3. Nothing in here runs user closures. Values and closures that leave the
//!    graph are parked in a trash list and dropped by the caller after the
//!    state borrow ends, since dropping them can re-enter the graph.

pub(crate) mod link;
mod node;
mod propagate;
mod scheduler;

use std::any::Any;

use slab::Slab;
use tracing::debug;

use crate::config::GraphConfig;

use link::Link;
pub(crate) use node::{ComputeFn, EqualityFn, Flags, Node, NodeKey, RunFn, Slot, Value};
pub use node::{NodeId, NodeKind};
use scheduler::EffectQueue;

/// All mutable state of one reactive graph.
pub(crate) struct GraphState {
    pub(crate) nodes: Slab<Node>,
    pub(crate) links: Slab<Link>,
    pub(crate) queue: EffectQueue,

    /// The node whose tracking pass is running, if any.
    pub(crate) active: Option<NodeKey>,

    pub(crate) batch_depth: usize,

    /// Set while the queue is being drained, so nested writes append
    /// to the running drain instead of starting another one.
    pub(crate) draining: bool,

    /// Number of memo computations on the stack, untracked or not.
    pub(crate) computing: usize,

    /// Nodes whose subscriber list became empty and still need settling.
    orphans: Vec<NodeKey>,

    trash: Vec<Box<dyn Any + Send>>,

    next_serial: u32,
}

impl GraphState {
    pub(crate) fn new(config: &GraphConfig) -> Self {
        Self {
            nodes: Slab::with_capacity(config.node_capacity),
            links: Slab::with_capacity(config.link_capacity),
            queue: EffectQueue::with_capacity(config.queue_capacity),
            active: None,
            batch_depth: 0,
            draining: false,
            computing: 0,
            orphans: Vec::new(),
            trash: Vec::new(),
            next_serial: 0,
        }
    }

    /// Add a node built from a fresh serial number.
    pub(crate) fn insert(&mut self, build: impl FnOnce(u32) -> Node) -> NodeKey {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        let key = self.nodes.insert(build(serial));
        debug!(node = %self.id_of(key), kind = ?self.nodes[key].kind, "node created");
        key
    }

    pub(crate) fn id_of(&self, key: NodeKey) -> NodeId {
        NodeId::new(key, self.nodes[key].serial)
    }

    /// Look up a live node. Fails for disposed nodes, even if the slot was reused.
    pub(crate) fn resolve(&self, id: NodeId) -> Option<NodeKey> {
        self.nodes
            .get(id.key())
            .filter(|node| node.serial == id.serial())
            .map(|_| id.key())
    }

    /// The node that a read should subscribe, if a tracking pass is running.
    pub(crate) fn tracking_target(&self) -> Option<NodeKey> {
        self.active
            .filter(|&key| matches!(self.nodes[key].kind, NodeKind::Derived | NodeKind::Effect))
    }

    /// The effect or scope that owns effects created right now, if any.
    pub(crate) fn owner(&self) -> Option<NodeKey> {
        self.active.filter(|&key| self.nodes[key].is_sink())
    }

    /// Park a value so it is dropped outside the state borrow.
    pub(crate) fn discard(&mut self, garbage: Box<dyn Any + Send>) {
        self.trash.push(garbage);
    }

    pub(crate) fn take_trash(&mut self) -> Vec<Box<dyn Any + Send>> {
        std::mem::take(&mut self.trash)
    }

    /// The current value of a signal or memo together with its equality, so
    /// a new value can be compared outside the state borrow.
    pub(crate) fn cached(&self, key: NodeKey) -> Option<(Option<Value>, EqualityFn)> {
        match &self.nodes[key].slot {
            Slot::Source { value, equals } => Some((Some(value.clone()), equals.clone())),
            Slot::Derived { value, equals, .. } => Some((value.clone(), equals.clone())),
            Slot::Effect { .. } | Slot::Scope => None,
        }
    }

    /// Install a new value on a signal or memo.
    pub(crate) fn replace_value(&mut self, key: NodeKey, new: Value) {
        let old = match &mut self.nodes[key].slot {
            Slot::Source { value, .. } => Some(std::mem::replace(value, new)),
            Slot::Derived { value, .. } => value.replace(new),
            Slot::Effect { .. } | Slot::Scope => Some(new),
        };
        if let Some(old) = old {
            self.discard(Box::new(old));
        }
    }

    pub(crate) fn subscriber_count(&self, key: NodeKey) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes[key].subs;
        while let Some(id) = cursor {
            count += 1;
            cursor = self.links[id].next_sub;
        }
        count
    }

    pub(crate) fn dependency_count(&self, key: NodeKey) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes[key].deps;
        while let Some(id) = cursor {
            count += 1;
            cursor = self.links[id].next_dep;
        }
        count
    }

    /// Stop an effect or scope, disposing every effect it owns.
    ///
    /// A node that is in the middle of its own run is only flagged; the
    /// runtime finishes the job when the run returns.
    pub(crate) fn dispose_sink(&mut self, key: NodeKey) {
        let node = &mut self.nodes[key];
        if node.flags.contains(Flags::RECURSED_CHECK) {
            node.flags.insert(Flags::DISPOSED);
            return;
        }
        self.destroy(key);
        self.settle_orphans();
    }

    /// Remove a signal or memo whose last handle was dropped.
    pub(crate) fn release(&mut self, key: NodeKey) {
        self.destroy(key);
        self.settle_orphans();
    }

    /// Unlink a node from both sides and free its slot.
    pub(crate) fn destroy(&mut self, key: NodeKey) {
        while let Some(id) = self.nodes[key].subs {
            self.unlink(id);
        }
        self.unlink_dependencies(key);
        let node = self.nodes.remove(key);
        debug!(node = %NodeId::new(key, node.serial), kind = ?node.kind, "node disposed");
        self.trash.push(Box::new(node.slot));
    }

    /// Tear down every node and link. Outstanding handles stop resolving.
    pub(crate) fn clear(&mut self) {
        for node in self.nodes.drain() {
            self.trash.push(Box::new(node.slot));
        }
        self.links.clear();
        self.queue.clear();
        self.orphans.clear();
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn never_equal() -> EqualityFn {
        Arc::new(|_: &dyn Any, _: &dyn Any| false)
    }

    pub(crate) fn state() -> GraphState {
        GraphState::new(&GraphConfig::default())
    }

    pub(crate) fn source(state: &mut GraphState) -> NodeKey {
        state.insert(|serial| Node::source(serial, Arc::new(0_i32), never_equal()))
    }

    pub(crate) fn derived(state: &mut GraphState) -> NodeKey {
        state.insert(|serial| {
            Node::derived(serial, Arc::new(|| Arc::new(0_i32) as Value), never_equal())
        })
    }

    pub(crate) fn effect(state: &mut GraphState) -> NodeKey {
        state.insert(|serial| Node::effect(serial, Arc::new(|| {})))
    }

    /// Record `deps` as the complete dependency set of `sub`.
    pub(crate) fn track(state: &mut GraphState, sub: NodeKey, deps: &[NodeKey]) {
        state.start_tracking(sub);
        for &dep in deps {
            state.link(dep, sub);
        }
        state.end_tracking(sub);
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let mut state = state();
        let key = source(&mut state);
        let id = state.id_of(key);
        assert_eq!(state.resolve(id), Some(key));

        state.release(key);
        let reused = source(&mut state);
        assert_eq!(reused, key);
        assert_eq!(state.resolve(id), None);
    }

    #[test]
    fn release_unlinks_both_sides() {
        let mut state = state();
        let a = source(&mut state);
        let b = derived(&mut state);
        let e = effect(&mut state);
        track(&mut state, b, &[a]);
        track(&mut state, e, &[b]);
        assert_eq!(state.links.len(), 2);

        state.release(b);
        assert_eq!(state.links.len(), 0);
        assert_eq!(state.subscriber_count(a), 0);
        assert_eq!(state.dependency_count(e), 0);
    }

    #[test]
    fn disposing_an_effect_releases_idle_memos() {
        let mut state = state();
        let a = source(&mut state);
        let b = derived(&mut state);
        let e = effect(&mut state);
        track(&mut state, b, &[a]);
        track(&mut state, e, &[b]);
        state.nodes[b].flags.remove(Flags::DIRTY);

        state.dispose_sink(e);
        assert!(!state.nodes.contains(e));
        assert_eq!(state.subscriber_count(a), 0);
        assert_eq!(state.dependency_count(b), 0);
        assert!(state.nodes[b].flags.contains(Flags::DIRTY));
    }

    #[test]
    fn dispose_during_run_is_deferred() {
        let mut state = state();
        let e = effect(&mut state);
        state.start_tracking(e);

        state.dispose_sink(e);
        assert!(state.nodes.contains(e));
        assert!(state.nodes[e].flags.contains(Flags::DISPOSED));
    }

    #[test]
    fn replaced_values_are_parked() {
        let mut state = state();
        let a = source(&mut state);
        let b = derived(&mut state);
        assert!(state.cached(b).is_some_and(|(value, _)| value.is_none()));

        state.replace_value(a, Arc::new(5_i32));
        state.replace_value(b, Arc::new(6_i32));
        assert_eq!(state.take_trash().len(), 1);

        let (value, _) = state.cached(a).expect("source has a value");
        assert_eq!(value.and_then(|v| v.downcast_ref::<i32>().copied()), Some(5));
    }

    #[test]
    fn clear_empties_the_arena() {
        let mut state = state();
        let a = source(&mut state);
        let e = effect(&mut state);
        track(&mut state, e, &[a]);

        state.clear();
        assert_eq!(state.nodes.len(), 0);
        assert_eq!(state.links.len(), 0);
        assert_eq!(state.take_trash().len(), 2);
    }
}
