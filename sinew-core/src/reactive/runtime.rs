//! Reactive Runtime
//!
//! The runtime is the part of the graph that calls user code. It connects
//! signals, memos and effects to the graph algorithms and decides when each
//! of them runs.
//!
//! # How It Works
//!
//! 1. Writing a signal flags everything downstream (push) and queues the
//!    effects it reaches.
//!
//! 2. Reading a memo checks its flags. A `PENDING` memo walks its inputs to
//!    find out whether any of them really changed (pull) and recomputes only
//!    if one did.
//!
//! 3. Once the outermost write or batch completes, the queue is drained and
//!    each queued effect is given the same check before it runs.
//!
//! # Locking
//!
//! All state of a graph sits behind one reentrant mutex, so a graph can be
//! shared between threads but only one thread is inside it at a time. The
//! owning thread re-enters freely: effects write signals, memos read memos.
//! The inner `RefCell` is only ever borrowed for short stretches that do not
//! call user code.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use smallvec::SmallVec;
use tracing::{debug, debug_span, error, trace, warn};

use super::context::{ActiveSubscriber, BatchGuard};
use super::effect::{Effect, Scope};
use super::equality;
use super::memo::Memo;
use super::signal::Signal;
use crate::config::GraphConfig;
use crate::error::ReactiveError;
use crate::graph::link::LinkId;
use crate::graph::{ComputeFn, Flags, GraphState, Node, NodeId, NodeKey, NodeKind, RunFn, Slot, Value};

/// A reactive dependency graph.
///
/// The graph owns every signal, memo and effect created through it. Handles
/// are cheap to clone and only refer back to the graph weakly: once the last
/// `ReactiveGraph` clone is dropped, the graph and everything in it is
/// freed, and the handles report [`ReactiveError::Disposed`].
///
/// Closures that capture a `ReactiveGraph` keep it alive until
/// [`shutdown`](Self::shutdown) clears them.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// use sinew_core::ReactiveGraph;
///
/// let graph = ReactiveGraph::new();
/// let count = graph.signal(1);
/// let doubled = graph.memo({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// let seen = Arc::new(AtomicI32::new(0));
/// let _effect = graph.effect({
///     let seen = seen.clone();
///     move || seen.store(doubled.get(), Ordering::SeqCst)
/// });
///
/// assert_eq!(seen.load(Ordering::SeqCst), 2);
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 10);
/// ```
#[derive(Clone)]
pub struct ReactiveGraph {
    inner: Arc<Inner>,
}

/// Shared core behind a [`ReactiveGraph`] and its handles.
pub(crate) struct Inner {
    state: ReentrantMutex<RefCell<GraphState>>,
    config: GraphConfig,
}

/// Keeps a signal or memo alive. Shared by all clones of one handle; the
/// node is released when the last clone goes away.
pub(crate) struct NodeOwner {
    graph: Weak<Inner>,
    id: NodeId,
}

impl NodeOwner {
    pub(crate) fn new(graph: &Arc<Inner>, id: NodeId) -> Self {
        Self {
            graph: Arc::downgrade(graph),
            id,
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn graph(&self) -> Result<Arc<Inner>, ReactiveError> {
        upgrade(&self.graph, self.id)
    }
}

impl Drop for NodeOwner {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.release(self.id);
        }
    }
}

pub(crate) fn upgrade(graph: &Weak<Inner>, id: NodeId) -> Result<Arc<Inner>, ReactiveError> {
    graph.upgrade().ok_or(ReactiveError::Disposed { node: id })
}

/// One step of the dirty check.
enum Step {
    /// The subscriber itself is already known to be dirty.
    Dirty,
    /// The dependency is a memo that must recompute to answer.
    Recompute(NodeKey),
    /// The dependency is a pending memo; check its own inputs first.
    Descend(NodeKey, LinkId),
    /// The dependency did not change.
    Clean,
}

impl ReactiveGraph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create a graph with the given configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        debug!(label = %config.label, "graph created");
        Self {
            inner: Arc::new(Inner {
                state: ReentrantMutex::new(RefCell::new(GraphState::new(&config))),
                config,
            }),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// Create a signal. Writes that compare equal to the current value,
    /// as decided by [`same_value`](crate::same_value), are ignored.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.signal_with(value, equality::same_value)
    }

    /// Create a signal with a custom notion of "unchanged".
    pub fn signal_with<T, E>(&self, value: T, equals: E) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let equals = equality::erase(equals);
        let id = self.inner.with(|state| {
            let key = state.insert(|serial| Node::source(serial, Arc::new(value), equals));
            state.id_of(key)
        });
        Signal::new(NodeOwner::new(&self.inner, id))
    }

    /// Create a memo. The computation does not run until the first read.
    pub fn memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.memo_with(compute, equality::same_value)
    }

    /// Create a memo with a custom notion of "unchanged". Readers downstream
    /// of a memo are only re-run when a recomputation produced a value that
    /// `equals` considers different.
    pub fn memo_with<T, F, E>(&self, compute: F, equals: E) -> Memo<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let compute: ComputeFn = Arc::new(move || Arc::new(compute()) as Value);
        let equals = equality::erase(equals);
        let id = self.inner.with(|state| {
            let key = state.insert(|serial| Node::derived(serial, compute, equals));
            state.id_of(key)
        });
        Memo::new(NodeOwner::new(&self.inner, id))
    }

    /// Create an effect and run it once right away.
    ///
    /// An effect created while another effect or a scope is running belongs
    /// to it and is stopped with it. Otherwise it lives until
    /// [`Effect::stop`] is called or the graph goes away; dropping the
    /// handle does not stop it.
    pub fn effect<F>(&self, run: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.create_effect(Arc::new(run));
        Effect::new(Arc::downgrade(&self.inner), id)
    }

    /// Run `f` inside a new scope and return the scope. Effects created by
    /// `f` belong to the scope.
    pub fn scope<F>(&self, f: F) -> Scope
    where
        F: FnOnce(),
    {
        let id = self.inner.create_scope(f);
        Scope::new(Arc::downgrade(&self.inner), id)
    }

    /// Run `f` with effect scheduling deferred until it returns.
    ///
    /// Batches nest; only the outermost one drains the queue.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.inner.state.lock();
        let _batch = self.start_batch();
        f()
    }

    /// Begin a batch that lasts until the returned guard is dropped.
    ///
    /// Unlike [`batch`](Self::batch), the guard does not hold the graph's
    /// lock. Writes made by other threads while it is alive are deferred
    /// too, and their effects run when the guard drops.
    pub fn start_batch(&self) -> BatchGuard {
        BatchGuard::new(self.inner.clone())
    }

    pub fn is_batching(&self) -> bool {
        self.inner.with(|state| state.batch_depth > 0)
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.untracked(f)
    }

    /// Whether reads right now would be recorded as dependencies.
    pub fn is_tracking(&self) -> bool {
        self.inner.with(|state| state.tracking_target().is_some())
    }

    /// Run every queued effect that is not held back by a batch.
    ///
    /// Writes drain the queue on their own; this is for effects left queued
    /// by a batch that unwound.
    pub fn flush(&self) {
        self.inner.flush();
    }

    pub fn node_count(&self) -> usize {
        self.inner.with(|state| state.nodes.len())
    }

    pub fn link_count(&self) -> usize {
        self.inner.with(|state| state.links.len())
    }

    /// Number of outermost effects waiting in the queue.
    pub fn pending_effects(&self) -> usize {
        self.inner.with(|state| state.queue.len())
    }

    /// Drain the queue, then dispose of every node.
    ///
    /// Open batches are abandoned: their effects run as part of the drain.
    /// Handles created before the shutdown report [`ReactiveError::Disposed`]
    /// afterwards. The graph itself stays usable. Calling this from inside a
    /// running computation does nothing.
    pub fn shutdown(&self) {
        let _serial = self.inner.state.lock();
        if self
            .inner
            .with(|state| state.active.is_some() || state.draining || state.computing > 0)
        {
            warn!(label = %self.inner.config.label, "shutdown requested from inside the graph; ignored");
            return;
        }
        self.inner.with(|state| state.batch_depth = 0);
        let drained = panic::catch_unwind(AssertUnwindSafe(|| self.inner.flush()));
        let disposed = self.inner.with(|state| {
            let count = state.nodes.len();
            state.clear();
            count
        });
        debug!(label = %self.inner.config.label, disposed, "graph shut down");
        if let Err(payload) = drained {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for ReactiveGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReactiveGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveGraph")
            .field("label", &self.inner.config.label)
            .field("nodes", &self.node_count())
            .field("links", &self.link_count())
            .finish()
    }
}

impl Inner {
    /// Borrow the state for a stretch that does not call user code.
    ///
    /// Anything the closure discarded is dropped after the borrow ends,
    /// because dropping a value or closure may release handles and so
    /// re-enter the graph.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut GraphState) -> R) -> R {
        let serial = self.state.lock();
        let (result, trash) = {
            let mut state = serial.borrow_mut();
            let result = f(&mut *state);
            (result, state.take_trash())
        };
        drop(trash);
        result
    }

    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.state.lock();
        let _guard = ActiveSubscriber::enter(self, None);
        f()
    }

    /// Read a signal, subscribing the running computation to it.
    pub(crate) fn read_source<T: Clone + 'static>(&self, id: NodeId) -> Result<T, ReactiveError> {
        self.with(|state| {
            let Some(key) = state.resolve(id) else {
                return Err(ReactiveError::Disposed { node: id });
            };
            if let Some(target) = state.tracking_target() {
                state.link(key, target);
            }
            read_value(state, id)
        })
    }

    /// Replace a signal's value. Unless `force` is set, a value equal to the
    /// current one is dropped without notifying anyone.
    ///
    /// The equality check runs outside the state borrow, untracked, so it
    /// may read other handles.
    pub(crate) fn write_source<T: Send + Sync + 'static>(
        &self,
        id: NodeId,
        value: T,
        force: bool,
    ) -> Result<bool, ReactiveError> {
        let _serial = self.state.lock();
        let new: Value = Arc::new(value);
        if !force {
            let (current, equals) = self.with(|state| {
                state
                    .resolve(id)
                    .and_then(|key| state.cached(key))
                    .ok_or(ReactiveError::Disposed { node: id })
            })?;
            let same = current.is_some_and(|old| self.untracked(|| equals(&*old, &*new)));
            if same {
                return Ok(false);
            }
        }

        self.with(|state| {
            let Some(key) = state.resolve(id) else {
                return Err(ReactiveError::Disposed { node: id });
            };
            state.replace_value(key, new);
            trace!(node = %id, "signal written");
            if let Some(head) = state.nodes[key].subs {
                state.propagate(head);
            }
            Ok(())
        })?;
        self.flush();
        Ok(true)
    }

    /// Read a signal and write back `f` of its value while holding the lock,
    /// so no other thread can write in between.
    pub(crate) fn update_source<T: Clone + Send + Sync + 'static>(
        &self,
        id: NodeId,
        f: impl FnOnce(T) -> T,
        force: bool,
    ) -> Result<bool, ReactiveError> {
        let _serial = self.state.lock();
        let current = self.with(|state| read_value::<T>(state, id))?;
        self.write_source(id, f(current), force)
    }

    /// Read a memo, bringing it up to date first.
    pub(crate) fn read_memo<T: Clone + 'static>(&self, id: NodeId) -> Result<T, ReactiveError> {
        let _serial = self.state.lock();
        let key = self.with(|state| {
            let Some(key) = state.resolve(id) else {
                return Err(ReactiveError::Disposed { node: id });
            };
            if state.nodes[key].flags.contains(Flags::RECURSED_CHECK) {
                return Err(ReactiveError::CyclicDependency { node: id });
            }
            if let Some(target) = state.tracking_target() {
                state.link(key, target);
            }
            Ok(key)
        })?;

        self.refresh(key);
        let value = self.with(|state| read_value(state, id));
        if self.with(|state| state.active.is_none()) {
            // Writes made by the computations above were held back.
            self.flush();
        }
        value
    }

    /// Bring a memo up to date.
    fn refresh(&self, key: NodeKey) {
        let (stale, pending) = self.with(|state| {
            let node = &state.nodes[key];
            (node.needs_compute(), node.flags.contains(Flags::PENDING))
        });
        if stale || (pending && self.check_dirty(key)) {
            if self.recompute(key) {
                self.with(|state| state.shallow_propagate(key));
            }
        } else if pending {
            self.with(|state| state.nodes[key].flags.remove(Flags::PENDING));
        }
    }

    /// Run a memo's computation, tracking what it reads. Returns whether
    /// the value changed. A panicking computation marks the memo failed
    /// and the panic continues.
    fn recompute(&self, key: NodeKey) -> bool {
        let Some((id, compute)) = self.with(|state| {
            let compute = match &state.nodes[key].slot {
                Slot::Derived { compute, .. } => compute.clone(),
                _ => return None,
            };
            state.start_tracking(key);
            Some((state.id_of(key), compute))
        }) else {
            return false;
        };

        self.with(|state| state.computing += 1);
        let guard = ActiveSubscriber::enter(self, Some(key));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| compute()));
        drop(guard);

        let cached = self.with(|state| {
            state.computing -= 1;
            let key = state.resolve(id)?;
            state.end_tracking(key);
            state.cached(key)
        });

        // Compare outside the borrow; the equality is user code too.
        let outcome = outcome.and_then(|value| match cached {
            Some((Some(old), equals)) => {
                let same = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.untracked(|| equals(&*old, &*value))
                }))?;
                Ok((value, same))
            }
            _ => Ok((value, false)),
        });

        let outcome = self.with(|state| {
            let resolved = state.resolve(id);
            match (resolved, outcome) {
                (None, Ok((value, _))) => {
                    state.discard(Box::new(value));
                    Ok(false)
                }
                (Some(_), Ok((value, true))) => {
                    state.discard(Box::new(value));
                    Ok(false)
                }
                (Some(key), Ok((value, false))) => {
                    state.replace_value(key, value);
                    Ok(true)
                }
                (Some(key), Err(payload)) => {
                    state.nodes[key].flags.insert(Flags::FAILED);
                    Err(payload)
                }
                (None, Err(payload)) => Err(payload),
            }
        });
        match outcome {
            Ok(changed) => {
                trace!(node = %id, changed, "memo recomputed");
                changed
            }
            Err(payload) => {
                debug!(node = %id, "memo computation panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Decide whether a `PENDING` subscriber really has a changed input,
    /// recomputing pending memos along the way as needed.
    ///
    /// The walk is depth-first through pending memos with an explicit stack.
    /// Memos found to have changed while other readers depend on them
    /// pass the news on to those readers.
    fn check_dirty(&self, root: NodeKey) -> bool {
        let Some(first) = self.with(|state| state.nodes[root].deps) else {
            return false;
        };
        let mut stack: SmallVec<[(NodeKey, LinkId); 8]> = SmallVec::new();
        let mut sub = root;
        let mut link = first;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            'check: loop {
                let mut dirty = match self.with(|state| next_step(state, sub, link)) {
                    Step::Dirty => true,
                    Step::Clean => false,
                    Step::Recompute(dep) => self.recompute_shared(dep),
                    Step::Descend(dep, first) => {
                        stack.push((sub, link));
                        sub = dep;
                        link = first;
                        continue 'check;
                    }
                };

                if !dirty {
                    if let Some(next) = self.with(|state| state.links[link].next_dep) {
                        link = next;
                        continue 'check;
                    }
                }

                loop {
                    let Some(&(parent, parent_link)) = stack.last() else {
                        break 'check dirty;
                    };
                    if dirty {
                        dirty = self.recompute_shared(sub);
                    } else {
                        self.with(|state| state.nodes[sub].flags.remove(Flags::PENDING));
                    }
                    stack.pop();
                    sub = parent;
                    link = parent_link;
                    if !dirty {
                        if let Some(next) = self.with(|state| state.links[link].next_dep) {
                            link = next;
                            continue 'check;
                        }
                    }
                }
            }
        }));

        match outcome {
            Ok(dirty) => dirty,
            Err(payload) => {
                self.with(|state| {
                    for key in stack.iter().map(|&(key, _)| key).chain(Some(sub)) {
                        abandon(state, key);
                    }
                });
                panic::resume_unwind(payload)
            }
        }
    }

    /// Recompute a memo reached during a dirty check and tell its other
    /// readers when it changed.
    fn recompute_shared(&self, key: NodeKey) -> bool {
        let changed = self.recompute(key);
        if changed {
            self.with(|state| {
                if state.has_multiple_subs(key) {
                    state.shallow_propagate(key);
                }
            });
        }
        changed
    }

    pub(crate) fn create_effect(&self, run: RunFn) -> NodeId {
        let _serial = self.state.lock();
        let (key, id) = self.with(|state| {
            let key = state.insert(|serial| Node::effect(serial, run));
            if let Some(owner) = state.owner() {
                state.link(key, owner);
            }
            (key, state.id_of(key))
        });
        self.run_effect(key);
        self.flush();
        id
    }

    /// Run an effect body, tracking what it reads.
    fn run_effect(&self, key: NodeKey) {
        let Some((id, run)) = self.with(|state| {
            let run = match &state.nodes[key].slot {
                Slot::Effect { run } => run.clone(),
                _ => return None,
            };
            state.start_tracking(key);
            state.nodes[key].runs += 1;
            Some((state.id_of(key), run))
        }) else {
            return;
        };

        let guard = ActiveSubscriber::enter(self, Some(key));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run()));
        drop(guard);

        self.with(|state| {
            let Some(key) = state.resolve(id) else {
                return;
            };
            state.end_tracking(key);
            if state.nodes[key].flags.contains(Flags::DISPOSED) {
                state.destroy(key);
                state.settle_orphans();
            }
        });
        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
    }

    pub(crate) fn create_scope(&self, f: impl FnOnce()) -> NodeId {
        let _serial = self.state.lock();
        let id = self.with(|state| {
            let key = state.insert(Node::scope);
            if let Some(owner) = state.owner() {
                state.link(key, owner);
            }
            state.id_of(key)
        });
        self.run_in_scope(id, f);
        id
    }

    /// Run `f` with the scope `id` as owner of any effect it creates.
    pub(crate) fn run_in_scope<R>(&self, id: NodeId, f: impl FnOnce() -> R) -> Option<R> {
        let _serial = self.state.lock();
        let key = self.with(|state| {
            state
                .resolve(id)
                .filter(|&key| !state.nodes[key].flags.contains(Flags::DISPOSED))
        })?;
        let _guard = ActiveSubscriber::enter(self, Some(key));
        Some(f())
    }

    /// Stop an effect or scope. Stopping twice, or stopping a node the
    /// graph already disposed, does nothing.
    pub(crate) fn dispose(&self, id: NodeId) {
        self.with(|state| {
            if let Some(key) = state.resolve(id) {
                if state.nodes[key].is_sink() {
                    state.dispose_sink(key);
                }
            }
        });
    }

    pub(crate) fn release(&self, id: NodeId) {
        self.with(|state| {
            if let Some(key) = state.resolve(id) {
                state.release(key);
            }
        });
    }

    pub(crate) fn is_disposed(&self, id: NodeId) -> bool {
        self.with(|state| {
            state
                .resolve(id)
                .map_or(true, |key| state.nodes[key].flags.contains(Flags::DISPOSED))
        })
    }

    /// Read something off a live node.
    pub(crate) fn inspect<R>(&self, id: NodeId, f: impl FnOnce(&GraphState, NodeKey) -> R) -> Option<R> {
        self.with(|state| state.resolve(id).map(|key| f(&*state, key)))
    }

    /// Drain the effect queue.
    ///
    /// Nothing happens while a batch is open, while a drain is already
    /// running further up the stack, or while a memo is computing; the
    /// enclosing call drains when it finishes. A panicking effect does not
    /// stop the drain: every queued effect still gets its turn, and the
    /// first panic is resumed afterwards.
    pub(crate) fn flush(&self) {
        let _serial = self.state.lock();
        let start = self.with(|state| {
            if state.batch_depth > 0
                || state.draining
                || state.computing > 0
                || state.queue.is_empty()
            {
                return false;
            }
            state.draining = true;
            true
        });
        if !start {
            return;
        }

        let span = debug_span!("drain", graph = %self.config.label);
        let _enter = span.enter();

        let mut inner: SmallVec<[NodeId; 8]> = SmallVec::new();
        let mut first_panic = None;
        let mut visited = 0usize;
        loop {
            let next = match inner.pop() {
                Some(id) => Some(id),
                None => self.with(|state| state.queue.pop()),
            };
            let Some(id) = next else {
                break;
            };
            visited += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| self.visit(id))) {
                Ok(children) => inner.extend(children.into_iter().rev()),
                Err(payload) => {
                    error!(node = %id, reason = %panic_message(&*payload), "effect panicked");
                    first_panic.get_or_insert(payload);
                }
            }
        }

        self.with(|state| state.draining = false);
        trace!(visited, "queue drained");
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Handle one dequeued node: run it if it is an effect with a changed
    /// input, otherwise hand back its queued inner effects.
    fn visit(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let Some((key, flags, kind)) = self.with(|state| {
            let key = state.resolve(id)?;
            let flags = state.begin_visit(key);
            Some((key, flags, state.nodes[key].kind))
        }) else {
            return SmallVec::new();
        };
        if flags.contains(Flags::DISPOSED) {
            return SmallVec::new();
        }

        if kind == NodeKind::Effect
            && (flags.contains(Flags::DIRTY)
                || (flags.contains(Flags::PENDING) && self.check_dirty(key)))
        {
            trace!(node = %id, "effect re-run");
            self.run_effect(key);
            return SmallVec::new();
        }

        self.with(|state| match state.resolve(id) {
            Some(key) => {
                state.nodes[key].flags.remove(Flags::PENDING);
                state.queued_children(key)
            }
            None => SmallVec::new(),
        })
    }
}

fn next_step(state: &mut GraphState, sub: NodeKey, link: LinkId) -> Step {
    if state.nodes[sub].flags.contains(Flags::DIRTY) {
        return Step::Dirty;
    }
    let dep = state.links[link].dep;
    let node = &mut state.nodes[dep];
    if node.kind != NodeKind::Derived {
        return Step::Clean;
    }
    if node.needs_compute() {
        return Step::Recompute(dep);
    }
    if node.flags.contains(Flags::PENDING) {
        match node.deps {
            Some(first) => return Step::Descend(dep, first),
            None => node.flags.remove(Flags::PENDING),
        }
    }
    Step::Clean
}

/// Leave a node that was part of an interrupted dirty check in a state the
/// next read will not trust.
fn abandon(state: &mut GraphState, key: NodeKey) {
    let Some(node) = state.nodes.get_mut(key) else {
        return;
    };
    node.flags.remove(Flags::PENDING | Flags::DIRTY);
    if node.kind == NodeKind::Derived {
        node.flags.insert(Flags::FAILED);
    }
}

fn read_value<T: Clone + 'static>(state: &GraphState, id: NodeId) -> Result<T, ReactiveError> {
    state
        .resolve(id)
        .and_then(|key| state.nodes[key].value())
        .and_then(|value| value.downcast_ref::<T>())
        .cloned()
        .ok_or(ReactiveError::Disposed { node: id })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(err) = payload.downcast_ref::<ReactiveError>() {
        err.to_string()
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn graph_starts_empty() {
        let graph = ReactiveGraph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.link_count(), 0);
        assert_eq!(graph.pending_effects(), 0);
        assert_eq!(graph.config().label, "sinew");
    }

    #[test]
    fn dropping_handles_frees_nodes() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let b = graph.memo({
            let a = a.clone();
            move || a.get() + 1
        });
        assert_eq!(b.get(), 2);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.link_count(), 1);

        drop(b);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.link_count(), 0);
    }

    #[test]
    fn effect_runs_once_on_creation() {
        let graph = ReactiveGraph::new();
        let runs = counter();
        let effect = graph.effect({
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn write_without_readers_schedules_nothing() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(0);
        a.set(1);
        assert_eq!(graph.pending_effects(), 0);
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn writes_inside_a_memo_wait_for_the_computation() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let b = graph.signal(0);
        let computing = counter();
        let overlaps = counter();
        let runs = counter();
        let _effect = graph.effect({
            let (b, computing, overlaps, runs) =
                (b.clone(), computing.clone(), overlaps.clone(), runs.clone());
            move || {
                b.get();
                runs.fetch_add(1, Ordering::SeqCst);
                if computing.load(Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        let memo = graph.memo({
            let (graph, a, b, computing) = (graph.clone(), a.clone(), b.clone(), computing.clone());
            move || {
                computing.fetch_add(1, Ordering::SeqCst);
                let value = a.get();
                graph.untrack(|| b.set(value));
                computing.fetch_sub(1, Ordering::SeqCst);
                value * 2
            }
        });

        assert_eq!(memo.get(), 2);
        assert_eq!(b.get(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);

        a.set(5);
        assert_eq!(memo.get(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        drop(memo);
    }

    #[test]
    fn shutdown_inside_an_untracked_computation_is_ignored() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let memo = graph.memo({
            let (graph, a) = (graph.clone(), a.clone());
            move || {
                graph.untrack(|| graph.shutdown());
                a.get()
            }
        });

        assert_eq!(memo.get(), 1);
        assert_eq!(graph.node_count(), 2);
        drop(memo);
    }

    #[test]
    fn batch_defers_until_outermost_returns() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(0);
        let runs = counter();
        let _effect = graph.effect({
            let a = a.clone();
            let runs = runs.clone();
            move || {
                a.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        graph.batch(|| {
            a.set(1);
            graph.batch(|| a.set(2));
            assert_eq!(graph.pending_effects(), 1);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(graph.pending_effects(), 0);
    }

    #[test]
    fn drain_continues_after_a_panicking_effect() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(0);
        let runs = counter();
        let _failing = graph.effect({
            let a = a.clone();
            move || {
                if a.get() > 0 {
                    panic!("failing effect");
                }
            }
        });
        let _healthy = graph.effect({
            let a = a.clone();
            let runs = runs.clone();
            move || {
                a.get();
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        let result = panic::catch_unwind(AssertUnwindSafe(|| a.set(1)));
        assert!(result.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        a.set(0);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_disposes_everything() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        let m = graph.memo({
            let a = a.clone();
            move || a.get()
        });
        let effect = graph.effect({
            let m = m.clone();
            move || {
                m.get();
            }
        });

        graph.shutdown();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.link_count(), 0);
        assert!(a.try_get().unwrap_err().is_disposed());
        assert!(m.try_get().unwrap_err().is_disposed());
        assert!(effect.is_stopped());
    }

    #[test]
    fn handles_outlive_the_graph() {
        let graph = ReactiveGraph::new();
        let a = graph.signal(1);
        drop(graph);
        assert!(a.try_get().unwrap_err().is_disposed());
        a.set(2);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*payload), "opaque panic payload");
    }
}
