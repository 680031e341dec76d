//! Structural diff of node states
//!
//! - `NodeStateDiff` receives the changes of one node
//! - `NodeStateComparator` produces them, `DocumentNodeStore` is one
//! - `DiffCache` memoizes child-name changes as JSOP
//! - `JsopDiff` renders a diff

mod cache;
mod jsop;

use crate::errors::StoreResult;
use crate::store::{NodeState, PropertyValue};

pub use cache::{AmnesiaDiffCache, DiffCache, MemoryDiffCache};
pub use jsop::{parse_child_changes, render_child_changes, ChildChange, JsopDiff};

/// Receiver of the changes between two states of one node. Returning
/// false stops the comparison.
pub trait NodeStateDiff {
    fn property_added(&mut self, name: &str, after: &PropertyValue) -> bool;

    fn property_changed(&mut self, name: &str, before: &PropertyValue, after: &PropertyValue)
        -> bool;

    fn property_deleted(&mut self, name: &str, before: &PropertyValue) -> bool;

    fn child_node_added(&mut self, name: &str, after: &NodeState) -> bool;

    fn child_node_changed(&mut self, name: &str, before: &NodeState, after: &NodeState) -> bool;

    fn child_node_deleted(&mut self, name: &str, before: &NodeState) -> bool;
}

/// Reports the changes from `before` to `after` of the same path.
pub trait NodeStateComparator {
    /// Returns false if `diff` stopped the comparison.
    fn compare(
        &self,
        after: &NodeState,
        before: &NodeState,
        diff: &mut dyn NodeStateDiff,
    ) -> StoreResult<bool>;
}
