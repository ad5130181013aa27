//! Propagation
//!
//! The push half of the algorithm. After a signal changes, everything that
//! transitively reads it is flagged: direct readers become `DIRTY`, readers
//! further away become `PENDING` ("an input might have changed"). Effects
//! reached this way are handed to the scheduler. Memos are never recomputed
//! here; that is left to the pull on the next read.
//!
//! # Algorithm
//!
//! The walk is depth-first over subscriber lists. Descending into a memo's
//! subscribers pushes the sibling to resume at onto an explicit stack, so
//! the depth of that stack is also the distance from the changed signal.
//!
//! A node that already carries `DIRTY` or `PENDING` was reached by an
//! earlier path (or an earlier, still unsettled change), so its own
//! subscribers are already flagged and it is not walked again. This is what
//! keeps diamonds from being visited twice.

use smallvec::SmallVec;
use tracing::trace;

use super::link::LinkId;
use super::{Flags, GraphState, NodeKey};

impl GraphState {
    /// Flag everything downstream of the subscriber list starting at `head`.
    pub(crate) fn propagate(&mut self, head: LinkId) {
        let mut link = head;
        let mut next = self.links[head].next_sub;
        let mut resume: SmallVec<[Option<LinkId>; 16]> = SmallVec::new();
        let mut visited = 0usize;

        'walk: loop {
            let sub = self.links[link].sub;
            let target = if resume.is_empty() {
                Flags::DIRTY
            } else {
                Flags::PENDING
            };

            if let Some(notify) = self.mark(link, sub, target) {
                visited += 1;
                let flags = self.nodes[sub].flags;
                if notify && flags.contains(Flags::WATCHER) {
                    self.notify(sub);
                }
                if flags.contains(Flags::COMPUTABLE) {
                    if let Some(first) = self.nodes[sub].subs {
                        resume.push(next);
                        link = first;
                        next = self.links[first].next_sub;
                        continue 'walk;
                    }
                }
            }

            if let Some(sibling) = next {
                link = sibling;
                next = self.links[sibling].next_sub;
                continue;
            }

            while let Some(saved) = resume.pop() {
                if let Some(sibling) = saved {
                    link = sibling;
                    next = self.links[sibling].next_sub;
                    continue 'walk;
                }
            }
            break;
        }

        trace!(visited, "change propagated");
    }

    /// Apply `target` to `sub`, reached through `link`.
    ///
    /// Returns `None` when the walk must not continue through `sub`, and
    /// otherwise whether a watcher should be scheduled.
    fn mark(&mut self, link: LinkId, sub: NodeKey, target: Flags) -> Option<bool> {
        let flags = self.nodes[sub].flags;
        if !flags.intersects(Flags::COMPUTABLE | Flags::WATCHER) {
            return None;
        }

        if !flags.intersects(Flags::RECURSED_CHECK | Flags::RECURSED | Flags::DIRTY | Flags::PENDING) {
            self.nodes[sub].flags.insert(target);
            Some(true)
        } else if !flags.intersects(Flags::RECURSED_CHECK | Flags::RECURSED) {
            // Reached before; a direct edge still upgrades PENDING to DIRTY.
            self.nodes[sub].flags.insert(target);
            None
        } else if !flags.contains(Flags::RECURSED_CHECK) {
            self.nodes[sub].flags = flags.without(Flags::RECURSED) | target;
            Some(true)
        } else if !flags.intersects(Flags::DIRTY | Flags::PENDING) && self.is_valid_link(link, sub) {
            // `sub` is running and already read this dependency. Its readers
            // must hear about it, but it does not schedule itself.
            self.nodes[sub].flags.insert(Flags::RECURSED | target);
            Some(false)
        } else {
            None
        }
    }

    /// Mark the immediate readers of `key` dirty after its value changed
    /// during a pull. Only readers that are already `PENDING` are touched.
    pub(crate) fn shallow_propagate(&mut self, key: NodeKey) {
        let mut cursor = self.nodes[key].subs;
        while let Some(id) = cursor {
            let sub = self.links[id].sub;
            cursor = self.links[id].next_sub;
            let flags = self.nodes[sub].flags;
            if flags.contains(Flags::PENDING) && !flags.contains(Flags::DIRTY) {
                self.nodes[sub].flags.insert(Flags::DIRTY);
                if flags.contains(Flags::WATCHER) {
                    self.notify(sub);
                }
            }
        }
    }

    pub(crate) fn has_multiple_subs(&self, key: NodeKey) -> bool {
        self.nodes[key]
            .subs
            .map_or(false, |head| self.links[head].next_sub.is_some())
    }
}
