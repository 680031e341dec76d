//! Immutable node states

use std::collections::BTreeMap;

use super::node_builder::NodeBuilder;
use super::value::PropertyValue;
use crate::document::Path;
use crate::revision::RevisionVector;

/// A node as seen by one reader vector.
///
/// `last_revision` holds, per member, the newest change to the node or its
/// subtree known to that reader. Two states of the same path with equal
/// `last_revision` have equal content.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    path: Path,
    root_revision: RevisionVector,
    last_revision: RevisionVector,
    properties: BTreeMap<String, PropertyValue>,
}

impl NodeState {
    pub(crate) fn new(
        path: Path,
        root_revision: RevisionVector,
        last_revision: RevisionVector,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Self {
        Self {
            path,
            root_revision,
            last_revision,
            properties,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// The reader vector this state was resolved with.
    pub fn root_revision(&self) -> &RevisionVector {
        &self.root_revision
    }

    pub fn last_revision(&self) -> &RevisionVector {
        &self.last_revision
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// A builder for changes based on this state's reader vector.
    pub fn builder(&self) -> NodeBuilder {
        NodeBuilder::new(self.root_revision.clone())
    }
}
