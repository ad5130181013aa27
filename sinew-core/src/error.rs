//! Error types for the reactive graph.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised by graph operations.
///
/// `get()` on a handle panics with one of these as the panic payload;
/// `try_get()` returns it instead.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A memo was read while it was still computing, either directly by its
    /// own computation or through a chain of other memos.
    #[error("cyclic dependency detected at node {node}")]
    CyclicDependency {
        /// The memo that was re-entered.
        node: NodeId,
    },

    /// The node behind a handle no longer exists, because it was stopped,
    /// the graph was shut down, or the graph itself was dropped.
    #[error("node {node} has been disposed")]
    Disposed {
        /// The node the handle pointed at.
        node: NodeId,
    },

    /// A graph configuration document could not be parsed.
    #[error("invalid graph configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Returns `true` for [`ReactiveError::CyclicDependency`].
    pub fn is_cycle(&self) -> bool {
        matches!(self, ReactiveError::CyclicDependency { .. })
    }

    /// Returns `true` for [`ReactiveError::Disposed`].
    pub fn is_disposed(&self) -> bool {
        matches!(self, ReactiveError::Disposed { .. })
    }
}
