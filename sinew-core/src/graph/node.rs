//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every role shares the same link heads; what differs is the slot payload
//! and which flags the algorithms are allowed to set.

use std::any::Any;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use super::link::LinkId;

/// Index of a node inside the graph's arena.
pub(crate) type NodeKey = usize;

/// Type-erased node value. Shared so it can be compared outside the state
/// borrow.
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Type-erased memo computation.
pub(crate) type ComputeFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Type-erased effect body.
pub(crate) type RunFn = Arc<dyn Fn() + Send + Sync>;

/// Type-erased equality between two values of the same node.
pub(crate) type EqualityFn = Arc<dyn Fn(&dyn Any, &dyn Any) -> bool + Send + Sync>;

/// Unique identifier for a node in the dependency graph.
///
/// The arena reuses slots, so an id carries the serial number the slot had
/// when the node was created. A handle whose node was disposed never
/// resolves to a newer node living in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    key: NodeKey,
    serial: u32,
}

impl NodeId {
    pub(crate) fn new(key: NodeKey, serial: u32) -> Self {
        Self { key, serial }
    }

    pub(crate) fn key(self) -> NodeKey {
        self.key
    }

    pub(crate) fn serial(self) -> u32 {
        self.serial
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.key, self.serial)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (memo). These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. It has dependencies and runs for its side effect.
    /// Its only possible dependent is the effect or scope that created it.
    Effect,

    /// A grouping node with no function of its own. Effects created inside
    /// it are its dependencies, so stopping it tears them down.
    Scope,
}

/// Independent state markers stored on every node.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Flags(u16);

impl Flags {
    pub(crate) const NONE: Flags = Flags(0);
    /// Carries a value that can be asked whether it is stale.
    pub(crate) const COMPUTABLE: Flags = Flags(1 << 0);
    /// Must be scheduled rather than pulled.
    pub(crate) const WATCHER: Flags = Flags(1 << 1);
    /// A tracking pass is in progress on this node.
    pub(crate) const RECURSED_CHECK: Flags = Flags(1 << 2);
    /// Reached by propagation while its own tracking pass was running.
    pub(crate) const RECURSED: Flags = Flags(1 << 3);
    /// An input definitely changed.
    pub(crate) const DIRTY: Flags = Flags(1 << 4);
    /// An input might have changed.
    pub(crate) const PENDING: Flags = Flags(1 << 5);
    /// Sitting in the effect queue, or about to be visited through a parent.
    pub(crate) const QUEUED: Flags = Flags(1 << 6);
    /// An inner effect of this effect or scope is queued.
    pub(crate) const PENDING_INNER: Flags = Flags(1 << 7);
    /// The last computation panicked; the cached value cannot be trusted.
    pub(crate) const FAILED: Flags = Flags(1 << 8);
    /// Stopped. Set early when a stop is requested during the node's own run.
    pub(crate) const DISPOSED: Flags = Flags(1 << 9);

    const NAMES: [(Flags, &'static str); 10] = [
        (Flags::COMPUTABLE, "COMPUTABLE"),
        (Flags::WATCHER, "WATCHER"),
        (Flags::RECURSED_CHECK, "RECURSED_CHECK"),
        (Flags::RECURSED, "RECURSED"),
        (Flags::DIRTY, "DIRTY"),
        (Flags::PENDING, "PENDING"),
        (Flags::QUEUED, "QUEUED"),
        (Flags::PENDING_INNER, "PENDING_INNER"),
        (Flags::FAILED, "FAILED"),
        (Flags::DISPOSED, "DISPOSED"),
    ];

    pub(crate) fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub(crate) fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub(crate) fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub(crate) fn without(self, other: Flags) -> Flags {
        Flags(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in Flags::NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Role-specific payload of a node.
pub(crate) enum Slot {
    Source {
        value: Value,
        equals: EqualityFn,
    },
    Derived {
        /// `None` until the first successful computation.
        value: Option<Value>,
        compute: ComputeFn,
        equals: EqualityFn,
    },
    Effect {
        run: RunFn,
    },
    Scope,
}

/// A node in the dependency graph.
pub(crate) struct Node {
    /// Serial of the arena slot at creation; see [`NodeId`].
    pub(crate) serial: u32,

    /// What kind of node this is.
    pub(crate) kind: NodeKind,

    pub(crate) flags: Flags,

    /// Head of the list of links to nodes this node reads from.
    pub(crate) deps: Option<LinkId>,

    /// Tracking cursor while a pass is running, the true tail otherwise.
    pub(crate) deps_tail: Option<LinkId>,

    /// Head of the list of links to nodes that read from this node.
    pub(crate) subs: Option<LinkId>,

    pub(crate) subs_tail: Option<LinkId>,

    pub(crate) slot: Slot,

    /// Completed or attempted executions of an effect body.
    pub(crate) runs: usize,
}

impl Node {
    fn new(serial: u32, kind: NodeKind, flags: Flags, slot: Slot) -> Self {
        Self {
            serial,
            kind,
            flags,
            deps: None,
            deps_tail: None,
            subs: None,
            subs_tail: None,
            slot,
            runs: 0,
        }
    }

    /// Create a new source (signal) node.
    pub(crate) fn source(serial: u32, value: Value, equals: EqualityFn) -> Self {
        Self::new(
            serial,
            NodeKind::Source,
            Flags::COMPUTABLE,
            Slot::Source { value, equals },
        )
    }

    /// Create a new derived (memo) node. It starts dirty so the first read computes.
    pub(crate) fn derived(serial: u32, compute: ComputeFn, equals: EqualityFn) -> Self {
        Self::new(
            serial,
            NodeKind::Derived,
            Flags::COMPUTABLE | Flags::DIRTY,
            Slot::Derived {
                value: None,
                compute,
                equals,
            },
        )
    }

    /// Create a new effect node.
    pub(crate) fn effect(serial: u32, run: RunFn) -> Self {
        Self::new(serial, NodeKind::Effect, Flags::WATCHER, Slot::Effect { run })
    }

    /// Create a new scope node.
    pub(crate) fn scope(serial: u32) -> Self {
        Self::new(serial, NodeKind::Scope, Flags::NONE, Slot::Scope)
    }

    /// Whether a read has to recompute before the cached value can be returned.
    pub(crate) fn needs_compute(&self) -> bool {
        self.flags.intersects(Flags::DIRTY | Flags::FAILED)
            || matches!(self.slot, Slot::Derived { value: None, .. })
    }

    /// Whether effects and scopes may own child effects through this node.
    pub(crate) fn is_sink(&self) -> bool {
        matches!(self.kind, NodeKind::Effect | NodeKind::Scope)
    }

    /// The current value of a source or derived node.
    pub(crate) fn value(&self) -> Option<&(dyn Any + Send + Sync)> {
        match &self.slot {
            Slot::Source { value, .. } => Some(value.as_ref()),
            Slot::Derived { value, .. } => value.as_deref(),
            Slot::Effect { .. } | Slot::Scope => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .field("deps", &self.deps)
            .field("subs", &self.subs)
            .finish()
    }
}
