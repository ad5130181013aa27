//! Effect Scheduler
//!
//! Effects reached by propagation are not run on the spot. They are put in
//! a FIFO queue that the runtime drains once the outermost write or batch
//! completes, so each effect runs at most once per settled change.
//!
//! # Nesting
//!
//! An effect created inside another effect (or inside a scope) is owned by
//! it. When such an inner effect is notified, only the outermost owner is
//! queued; every owner on the way up gets `PENDING_INNER`. Draining the
//! owner then either re-runs it, which rebuilds its inner effects anyway,
//! or walks down to the inner effects that are actually queued.

use std::collections::VecDeque;

use smallvec::SmallVec;

use super::{Flags, GraphState, NodeId, NodeKey};

/// Pending effects, in the order they were first notified.
#[derive(Debug, Default)]
pub(crate) struct EffectQueue {
    pending: VecDeque<NodeId>,
}

impl EffectQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, id: NodeId) {
        self.pending.push_back(id);
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.pending.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

impl GraphState {
    /// Schedule an effect. Deduplicated through `QUEUED`, never by scanning.
    pub(crate) fn notify(&mut self, key: NodeKey) {
        if self.nodes[key].flags.contains(Flags::QUEUED) {
            return;
        }
        self.nodes[key].flags.insert(Flags::QUEUED);

        let mut current = key;
        while let Some(head) = self.nodes[current].subs {
            let owner = self.links[head].sub;
            if self.nodes[owner]
                .flags
                .intersects(Flags::QUEUED | Flags::PENDING_INNER)
            {
                return;
            }
            self.nodes[owner].flags.insert(Flags::PENDING_INNER);
            current = owner;
        }

        let id = self.id_of(current);
        self.queue.push(id);
    }

    /// Clear the scheduling marks of a node about to be visited and return
    /// its remaining flags.
    pub(crate) fn begin_visit(&mut self, key: NodeKey) -> Flags {
        let node = &mut self.nodes[key];
        node.flags.remove(Flags::QUEUED | Flags::PENDING_INNER);
        node.flags
    }

    /// Inner effects of `key` that are waiting to be visited, in creation order.
    pub(crate) fn queued_children(&self, key: NodeKey) -> SmallVec<[NodeId; 4]> {
        let mut children = SmallVec::new();
        let mut cursor = self.nodes[key].deps;
        while let Some(id) = cursor {
            let dep = self.links[id].dep;
            if self.nodes[dep]
                .flags
                .intersects(Flags::QUEUED | Flags::PENDING_INNER)
            {
                children.push(self.id_of(dep));
            }
            cursor = self.links[id].next_dep;
        }
        children
    }
}
