//! Change detection.
//!
//! A write or a recomputation only counts as a change when the new value is
//! not the same as the old one. "The same" is `PartialEq`, with one
//! exception: two values that are each unequal to themselves (`NaN`) are
//! the same as each other. Without that rule a signal holding `f64::NAN`
//! would re-trigger its readers on every write.

use std::any::Any;
use std::sync::Arc;

use crate::graph::EqualityFn;

/// Default change detection used by signals and memos.
///
/// ```rust
/// use sinew_core::same_value;
///
/// assert!(same_value(&1, &1));
/// assert!(!same_value(&1, &2));
/// assert!(same_value(&f64::NAN, &f64::NAN));
/// assert!(!same_value(&f64::NAN, &0.0));
/// ```
#[allow(clippy::eq_op)]
pub fn same_value<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b || (a != a && b != b)
}

/// Type-erase a typed equality for storage in the graph.
pub(crate) fn erase<T, F>(eq: F) -> EqualityFn
where
    T: 'static,
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    Arc::new(move |a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => eq(a, b),
            _ => false,
        }
    })
}
