//! In-memory `DocumentStore`
//!
//! One ordered map per collection behind a `RwLock`. Every update takes
//! the write lock, which makes conditional updates atomic.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{BackendError, BackendResult, Collection, Document, DocumentStore, UpdateOp};

type Documents = BTreeMap<String, Document>;

/// A `DocumentStore` keeping all documents in process memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: [RwLock<Documents>; Collection::COUNT],
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, collection: Collection) -> RwLockReadGuard<'_, Documents> {
        self.collections[collection.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, collection: Collection) -> RwLockWriteGuard<'_, Documents> {
        self.collections[collection.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: Collection) -> usize {
        self.read(collection).len()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find(&self, collection: Collection, id: &str) -> BackendResult<Option<Document>> {
        Ok(self.read(collection).get(id).cloned())
    }

    fn query(
        &self,
        collection: Collection,
        from_id: &str,
        to_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Document>> {
        if from_id >= to_id {
            return Ok(Vec::new());
        }
        let docs = self.read(collection);
        Ok(docs
            .range::<str, _>((Bound::Excluded(from_id), Bound::Excluded(to_id)))
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn create(&self, collection: Collection, ops: &[UpdateOp]) -> BackendResult<bool> {
        let mut docs = self.write(collection);
        if ops.iter().any(|op| docs.contains_key(op.id())) {
            return Ok(false);
        }
        for op in ops {
            if !op.is_new() {
                return Err(BackendError::invalid_operation(
                    op.id(),
                    "create requires an op marked new",
                ));
            }
        }
        for op in ops {
            let mut doc = Document::new(op.id());
            op.apply_to(&mut doc);
            docs.insert(op.id().to_string(), doc);
        }
        Ok(true)
    }

    fn create_or_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        let mut docs = self.write(collection);
        let previous = docs.get(op.id()).cloned();
        if previous.is_none() && !op.is_new() {
            return Err(BackendError::invalid_operation(
                op.id(),
                "document does not exist",
            ));
        }
        let mut doc = previous.clone().unwrap_or_else(|| Document::new(op.id()));
        op.apply_to(&mut doc);
        docs.insert(op.id().to_string(), doc);
        Ok(previous)
    }

    fn find_and_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        let mut docs = self.write(collection);
        let Some(current) = docs.get_mut(op.id()) else {
            return Ok(None);
        };
        if !op.conditions_hold(Some(current)) {
            return Ok(None);
        }
        let previous = current.clone();
        op.apply_to(current);
        Ok(Some(previous))
    }

    fn remove(&self, collection: Collection, ids: &[String]) -> BackendResult<usize> {
        let mut docs = self.write(collection);
        Ok(ids.iter().filter(|id| docs.remove(id.as_str()).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Condition, Key};
    use serde_json::json;

    fn new_op(id: &str) -> UpdateOp {
        let mut op = UpdateOp::new(id, true);
        op.set("v", json!(1));
        op
    }

    #[test]
    fn test_create_only_if_absent() {
        let store = MemoryDocumentStore::new();
        assert!(store.create(Collection::Nodes, &[new_op("0:/")]).unwrap());
        assert!(!store.create(Collection::Nodes, &[new_op("0:/")]).unwrap());
        assert_eq!(store.count(Collection::Nodes), 1);
        assert_eq!(store.count(Collection::Settings), 0);
    }

    #[test]
    fn test_create_or_update_returns_previous() {
        let store = MemoryDocumentStore::new();
        assert!(store
            .create_or_update(Collection::Nodes, &new_op("1:/a"))
            .unwrap()
            .is_none());
        let previous = store
            .create_or_update(Collection::Nodes, &new_op("1:/a"))
            .unwrap()
            .unwrap();
        assert_eq!(previous.mod_count(), 1);
        let current = store.find(Collection::Nodes, "1:/a").unwrap().unwrap();
        assert_eq!(current.mod_count(), 2);
    }

    #[test]
    fn test_update_of_missing_document_is_rejected() {
        let store = MemoryDocumentStore::new();
        let op = UpdateOp::new("1:/missing", false);
        assert!(store.create_or_update(Collection::Nodes, &op).is_err());
    }

    #[test]
    fn test_find_and_update_checks_conditions() {
        let store = MemoryDocumentStore::new();
        store.create(Collection::Settings, &[new_op("locks")]).unwrap();

        let mut op = UpdateOp::new("locks", false);
        op.condition(Key::field("v"), Condition::Equals(json!(2)))
            .set("v", json!(3));
        assert!(store.find_and_update(Collection::Settings, &op).unwrap().is_none());

        let mut op = UpdateOp::new("locks", false);
        op.condition(Key::field("v"), Condition::Equals(json!(1)))
            .set("v", json!(3));
        assert!(store.find_and_update(Collection::Settings, &op).unwrap().is_some());
        let doc = store.find(Collection::Settings, "locks").unwrap().unwrap();
        assert_eq!(doc.get("v"), Some(&json!(3)));
    }

    #[test]
    fn test_query_is_exclusive_and_ordered() {
        let store = MemoryDocumentStore::new();
        for id in ["2:/a/a", "2:/a/b", "2:/a/c", "2:/b/a"] {
            store.create(Collection::Nodes, &[new_op(id)]).unwrap();
        }
        let docs = store.query(Collection::Nodes, "2:/a/", "2:/a0", 10).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["2:/a/a", "2:/a/b", "2:/a/c"]);

        let limited = store.query(Collection::Nodes, "2:/a/", "2:/a0", 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert!(store.query(Collection::Nodes, "z", "a", 10).unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let store = MemoryDocumentStore::new();
        store.create(Collection::Nodes, &[new_op("a"), new_op("b")]).unwrap();
        let removed = store
            .remove(Collection::Nodes, &["a".to_string(), "x".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
    }
}
