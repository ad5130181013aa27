//! Sinew Core
//!
//! This crate provides a fine-grained reactive dependency graph. It
//! implements:
//!
//! - Reactive primitives (signals, memos, effects, scopes)
//! - Push-pull change propagation with glitch-free, lazy memos
//! - An effect scheduler with batching
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: Node and link storage and the algorithms that never call user
//!   code (linking, propagation, scheduling)
//! - `reactive`: The runtime that runs user computations, and the typed
//!   handles built on it
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use sinew_core::ReactiveGraph;
//!
//! let graph = ReactiveGraph::new();
//!
//! // Create a signal
//! let count = graph.signal(0);
//!
//! // Create a derived value
//! let doubled = graph.memo({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let _effect = graph.effect({
//!     let count = count.clone();
//!     let seen = seen.clone();
//!     move || seen.lock().unwrap().push((count.get(), doubled.get()))
//! });
//!
//! // Update the signal; the effect runs again before `set` returns
//! count.set(5);
//! assert_eq!(*seen.lock().unwrap(), vec![(0, 0), (5, 10)]);
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::GraphConfig;
pub use error::ReactiveError;
pub use graph::{NodeId, NodeKind};
pub use reactive::{same_value, BatchGuard, Effect, Memo, MemoState, ReactiveGraph, Scope, Signal};
