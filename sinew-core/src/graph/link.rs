//! Link Pool
//!
//! A link is the edge between one dependency and one subscriber. It is
//! threaded through two doubly-linked lists at the same time, so inserting
//! or removing an edge is O(1) and never touches any other collection.
//!
//! # Tracking passes
//!
//! A subscriber re-records its dependencies every time it runs. Instead of
//! clearing the list up front, [`GraphState::start_tracking`] rewinds a
//! cursor (`deps_tail`) to the start. Each read either confirms the link
//! right after the cursor (the common case when the dependency shape is
//! stable) or splices a new one in. [`GraphState::end_tracking`] then
//! unlinks whatever is left past the cursor.

use tracing::trace;

use super::{Flags, GraphState, NodeKey, NodeKind};

/// Index of a link inside the graph's arena.
pub(crate) type LinkId = usize;

/// An edge from `dep` (read) to `sub` (reader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) dep: NodeKey,
    pub(crate) sub: NodeKey,

    /// Neighbours in `sub`'s dependency list.
    pub(crate) prev_dep: Option<LinkId>,
    pub(crate) next_dep: Option<LinkId>,

    /// Neighbours in `dep`'s subscriber list.
    pub(crate) prev_sub: Option<LinkId>,
    pub(crate) next_sub: Option<LinkId>,
}

impl GraphState {
    /// Record that `sub` read `dep`.
    pub(crate) fn link(&mut self, dep: NodeKey, sub: NodeKey) {
        let prev_dep = self.nodes[sub].deps_tail;
        if let Some(prev) = prev_dep {
            if self.links[prev].dep == dep {
                return;
            }
        }

        let tracking = self.nodes[sub].flags.contains(Flags::RECURSED_CHECK);
        let mut next_dep = None;
        if tracking {
            next_dep = match prev_dep {
                Some(prev) => self.links[prev].next_dep,
                None => self.nodes[sub].deps,
            };
            if let Some(next) = next_dep {
                if self.links[next].dep == dep {
                    self.nodes[sub].deps_tail = Some(next);
                    return;
                }
            }
        }

        let prev_sub = self.nodes[dep].subs_tail;
        if let Some(prev) = prev_sub {
            if self.links[prev].sub == sub && (!tracking || self.is_valid_link(prev, sub)) {
                return;
            }
        }

        let id = self.links.insert(Link {
            dep,
            sub,
            prev_dep,
            next_dep,
            prev_sub,
            next_sub: None,
        });

        self.nodes[sub].deps_tail = Some(id);
        self.nodes[dep].subs_tail = Some(id);
        if let Some(next) = next_dep {
            self.links[next].prev_dep = Some(id);
        }
        match prev_dep {
            Some(prev) => self.links[prev].next_dep = Some(id),
            None => self.nodes[sub].deps = Some(id),
        }
        match prev_sub {
            Some(prev) => self.links[prev].next_sub = Some(id),
            None => self.nodes[dep].subs = Some(id),
        }
    }

    /// Remove a link from both lists. Returns the next link in the
    /// subscriber's dependency list.
    ///
    /// A dependency left without subscribers is queued for
    /// [`settle_orphans`](Self::settle_orphans).
    pub(crate) fn unlink(&mut self, id: LinkId) -> Option<LinkId> {
        let Link {
            dep,
            sub,
            prev_dep,
            next_dep,
            prev_sub,
            next_sub,
        } = self.links.remove(id);

        match next_dep {
            Some(next) => self.links[next].prev_dep = prev_dep,
            None => self.nodes[sub].deps_tail = prev_dep,
        }
        match prev_dep {
            Some(prev) => self.links[prev].next_dep = next_dep,
            None => self.nodes[sub].deps = next_dep,
        }
        match next_sub {
            Some(next) => self.links[next].prev_sub = prev_sub,
            None => self.nodes[dep].subs_tail = prev_sub,
        }
        match prev_sub {
            Some(prev) => self.links[prev].next_sub = next_sub,
            None => {
                self.nodes[dep].subs = next_sub;
                if next_sub.is_none() {
                    self.orphans.push(dep);
                }
            }
        }

        next_dep
    }

    pub(crate) fn unlink_dependencies(&mut self, key: NodeKey) {
        let mut cursor = self.nodes[key].deps;
        while let Some(id) = cursor {
            cursor = self.unlink(id);
        }
    }

    /// Begin a tracking pass on `key`.
    pub(crate) fn start_tracking(&mut self, key: NodeKey) {
        let node = &mut self.nodes[key];
        node.deps_tail = None;
        node.flags = node
            .flags
            .without(Flags::RECURSED | Flags::DIRTY | Flags::PENDING | Flags::FAILED)
            | Flags::RECURSED_CHECK;
    }

    /// Finish a tracking pass: drop every dependency that was not read again.
    pub(crate) fn end_tracking(&mut self, key: NodeKey) {
        let mut stale = match self.nodes[key].deps_tail {
            Some(tail) => self.links[tail].next_dep,
            None => self.nodes[key].deps,
        };
        let mut dropped = 0usize;
        while let Some(id) = stale {
            stale = self.unlink(id);
            dropped += 1;
        }
        if dropped > 0 {
            trace!(node = %self.id_of(key), dropped, "dependencies dropped");
        }
        self.nodes[key].flags.remove(Flags::RECURSED_CHECK);
        self.settle_orphans();
    }

    /// Whether `check` was already confirmed by the running pass of `sub`.
    pub(crate) fn is_valid_link(&self, check: LinkId, sub: NodeKey) -> bool {
        let Some(tail) = self.nodes[sub].deps_tail else {
            return false;
        };
        let mut cursor = self.nodes[sub].deps;
        while let Some(id) = cursor {
            if id == check {
                return true;
            }
            if id == tail {
                break;
            }
            cursor = self.links[id].next_dep;
        }
        false
    }

    /// Deal with nodes that lost their last subscriber.
    ///
    /// A memo nobody watches lets go of its own dependencies and is marked
    /// dirty for the next read. An effect or scope that lost its owner is
    /// disposed along with everything it owns.
    pub(crate) fn settle_orphans(&mut self) {
        while let Some(key) = self.orphans.pop() {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            if node.subs.is_some() {
                continue;
            }
            match node.kind {
                NodeKind::Source => {}
                NodeKind::Derived => {
                    if node.deps.is_some() {
                        node.flags.remove(Flags::PENDING);
                        node.flags.insert(Flags::DIRTY);
                        self.unlink_dependencies(key);
                    }
                }
                NodeKind::Effect | NodeKind::Scope => {
                    if node.flags.contains(Flags::RECURSED_CHECK) {
                        node.flags.insert(Flags::DISPOSED);
                    } else {
                        self.destroy(key);
                    }
                }
            }
        }
    }
}
