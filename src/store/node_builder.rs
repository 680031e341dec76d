//! Pending changes of one merge
//!
//! Changes are recorded per absolute path against a base vector. Nothing
//! touches the backend until the builder is merged.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::value::{BlobSource, PropertyValue};
use crate::document::{is_property_name, Path};
use crate::errors::{StoreError, StoreResult};
use crate::revision::RevisionVector;

#[derive(Clone)]
pub(crate) enum PendingValue {
    Set(PropertyValue),
    Blob(Arc<dyn BlobSource>),
    Remove,
}

impl fmt::Debug for PendingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingValue::Set(value) => write!(f, "Set({})", value),
            PendingValue::Blob(_) => f.write_str("Blob(..)"),
            PendingValue::Remove => f.write_str("Remove"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NodeChanges {
    pub(crate) added: bool,
    pub(crate) removed: bool,
    pub(crate) properties: BTreeMap<String, PendingValue>,
}

/// Changes of one node with every value materialized. `None` removes a
/// property.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ChangeSet {
    pub(crate) added: bool,
    pub(crate) removed: bool,
    pub(crate) properties: BTreeMap<String, Option<PropertyValue>>,
}

/// Records changes to the tree as seen by `base`.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    base: RevisionVector,
    changes: BTreeMap<Path, NodeChanges>,
}

impl NodeBuilder {
    pub fn new(base: RevisionVector) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &RevisionVector {
        &self.base
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn set_property(
        &mut self,
        path: &str,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> StoreResult<&mut Self> {
        self.put_property(path, name, PendingValue::Set(value.into()))
    }

    /// Sets a binary property read from `source` when the builder is
    /// merged.
    pub fn set_blob(
        &mut self,
        path: &str,
        name: &str,
        source: Arc<dyn BlobSource>,
    ) -> StoreResult<&mut Self> {
        self.put_property(path, name, PendingValue::Blob(source))
    }

    pub fn remove_property(&mut self, path: &str, name: &str) -> StoreResult<&mut Self> {
        self.put_property(path, name, PendingValue::Remove)
    }

    /// Makes sure the node and all its ancestors exist. A node removed by
    /// this builder cannot be added again.
    pub fn add_node(&mut self, path: &str) -> StoreResult<&mut Self> {
        let path = self.writable(path)?;
        if self.changes.get(&path).is_some_and(|c| c.removed) {
            return Err(StoreError::invalid_argument(format!(
                "{} was removed by this builder",
                path
            )));
        }
        for ancestor in path.ancestors_and_self() {
            if !ancestor.is_root() {
                self.changes.entry(ancestor).or_default().added = true;
            }
        }
        Ok(self)
    }

    /// Removes the node with its subtree. Pending changes inside the
    /// subtree are dropped.
    pub fn remove_node(&mut self, path: &str) -> StoreResult<&mut Self> {
        let path: Path = path.parse()?;
        if path.is_root() {
            return Err(StoreError::invalid_argument("the root node cannot be removed"));
        }
        self.changes
            .retain(|changed, _| !path.is_ancestor_of(changed));
        self.changes.insert(
            path,
            NodeChanges {
                removed: true,
                ..NodeChanges::default()
            },
        );
        Ok(self)
    }

    fn put_property(
        &mut self,
        path: &str,
        name: &str,
        value: PendingValue,
    ) -> StoreResult<&mut Self> {
        if !is_property_name(name) {
            return Err(StoreError::invalid_argument(format!(
                "invalid property name '{}'",
                name
            )));
        }
        let path = self.writable(path)?;
        self.changes
            .entry(path)
            .or_default()
            .properties
            .insert(name.to_string(), value);
        Ok(self)
    }

    /// Parses `path` and rejects paths inside a subtree removed by this
    /// builder.
    fn writable(&self, path: &str) -> StoreResult<Path> {
        let path: Path = path.parse()?;
        let removed = path
            .ancestors_and_self()
            .into_iter()
            .filter(|ancestor| *ancestor != path)
            .any(|ancestor| self.changes.get(&ancestor).is_some_and(|c| c.removed));
        if removed {
            return Err(StoreError::invalid_argument(format!(
                "{} is inside a removed subtree",
                path
            )));
        }
        Ok(path)
    }

    /// Reads every lazy value. Runs before any commit lock is taken.
    pub(crate) fn materialize(&self) -> StoreResult<BTreeMap<Path, ChangeSet>> {
        let mut materialized = BTreeMap::new();
        for (path, changes) in &self.changes {
            let mut properties = BTreeMap::new();
            for (name, value) in &changes.properties {
                let value = match value {
                    PendingValue::Set(value) => Some(value.clone()),
                    PendingValue::Remove => None,
                    PendingValue::Blob(source) => {
                        let bytes = source.read_all().map_err(|e| {
                            StoreError::invalid_argument(format!(
                                "failed to read binary {}/{}: {}",
                                path, name, e
                            ))
                        })?;
                        Some(PropertyValue::Binary(bytes))
                    }
                };
                properties.insert(name.clone(), value);
            }
            materialized.insert(
                path.clone(),
                ChangeSet {
                    added: changes.added,
                    removed: changes.removed,
                    properties,
                },
            );
        }
        Ok(materialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn builder() -> NodeBuilder {
        NodeBuilder::new(RevisionVector::default())
    }

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_node_adds_ancestors() {
        let mut b = builder();
        b.add_node("/a/b/c").unwrap();
        let changes = b.materialize().unwrap();
        assert_eq!(changes.len(), 3);
        assert!(changes[&p("/a")].added);
        assert!(changes[&p("/a/b/c")].added);
    }

    #[test]
    fn test_reserved_property_names_rejected() {
        let mut b = builder();
        assert!(b.set_property("/", "_deleted", "x").is_err());
        assert!(b.set_property("/", "", "x").is_err());
        assert!(b.set_property("/", "p", "x").is_ok());
    }

    #[test]
    fn test_remove_node_drops_pending_subtree() {
        let mut b = builder();
        b.set_property("/a/b", "p", 1).unwrap();
        b.remove_node("/a").unwrap();
        let changes = b.materialize().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[&p("/a")].removed);

        assert!(b.set_property("/a/b", "p", 1).is_err());
        assert!(b.add_node("/a").is_err());
        assert!(b.remove_node("/").is_err());
    }

    #[test]
    fn test_materialize_reads_blob() {
        let mut b = builder();
        b.set_blob("/", "bin", Arc::new(vec![7u8, 8])).unwrap();
        b.remove_property("/", "gone").unwrap();
        let changes = b.materialize().unwrap();
        let root = &changes[&Path::root()];
        assert_eq!(root.properties["bin"], Some(PropertyValue::Binary(vec![7, 8])));
        assert_eq!(root.properties["gone"], None);
    }

    struct FailingBlob;

    impl BlobSource for FailingBlob {
        fn read_all(&self) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "broken"))
        }
    }

    #[test]
    fn test_unreadable_blob_fails_materialize() {
        let mut b = builder();
        b.set_blob("/", "bin", Arc::new(FailingBlob)).unwrap();
        assert!(b.materialize().is_err());
    }
}
