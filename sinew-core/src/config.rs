//! Graph Configuration
//!
//! A graph is configured once, at construction. The configuration only
//! affects sizing and diagnostics; it never changes propagation semantics.

use serde::Deserialize;

use crate::error::ReactiveError;

/// Construction-time settings for a [`ReactiveGraph`](crate::ReactiveGraph).
///
/// # Example
///
/// ```rust
/// use sinew_core::GraphConfig;
///
/// let config = GraphConfig::from_json(r#"{ "label": "editor", "node_capacity": 512 }"#).unwrap();
/// assert_eq!(config.label, "editor");
/// assert_eq!(config.link_capacity, GraphConfig::default().link_capacity);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Name attached to tracing spans emitted by this graph.
    pub label: String,

    /// Number of node slots to reserve up front.
    pub node_capacity: usize,

    /// Number of link slots to reserve up front.
    pub link_capacity: usize,

    /// Initial capacity of the pending effect queue.
    pub queue_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label: "sinew".to_string(),
            node_capacity: 64,
            link_capacity: 128,
            queue_capacity: 16,
        }
    }
}

impl GraphConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the tracing label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
