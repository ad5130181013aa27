//! Reactive Primitives
//!
//! This module implements the user-facing side of the graph: signals, memos,
//! effects and scopes, and the runtime that runs them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a memo or effect is running, the signal registers that computation
//! as a dependent. When the signal's value changes, all dependents are
//! notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when it is read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems.
//!
//! ## Scopes
//!
//! A Scope owns the effects created inside it, so they can be stopped as a
//! group.
//!
//! # Implementation Notes
//!
//! Dependencies are detected automatically: every graph remembers which
//! computation is running, and every read made meanwhile is recorded as an
//! edge. This is the same "transparent reactivity" used by SolidJS, Vue 3
//! and Leptos.

mod context;
mod effect;
mod equality;
mod memo;
mod runtime;
mod signal;

pub use context::BatchGuard;
pub use effect::{Effect, Scope};
pub use equality::same_value;
pub use memo::{Memo, MemoState};
pub use runtime::ReactiveGraph;
pub use signal::Signal;
