//! Cache of main node documents
//!
//! Every read-modify-write of a cached entry holds the document lock of
//! its id, so an older copy never replaces a newer one.
//!
//! Holds at most `capacity` documents besides the root, which is never
//! evicted. The oldest cached document goes first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::{Document, UpdateOp};
use crate::document::NodeDocument;
use crate::errors::StoreResult;
use crate::locks::{NodeDocumentLocks, StripedDocumentLocks, ROOT_ID};

#[derive(Debug, Default)]
struct Entries {
    documents: HashMap<String, Arc<NodeDocument>>,
    /// Insertion order of every cached id but the root.
    order: VecDeque<String>,
}

impl Entries {
    fn insert(&mut self, doc: Arc<NodeDocument>, capacity: usize) {
        let id = doc.id().to_string();
        if self.documents.insert(id.clone(), doc).is_none() && id != ROOT_ID {
            self.order.push_back(id);
        }
        while self.order.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.documents.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct DocumentCache {
    entries: RwLock<Entries>,
    capacity: usize,
    locks: StripedDocumentLocks,
}

impl DocumentCache {
    pub(crate) fn new(stripes: usize, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity: capacity.max(1),
            locks: StripedDocumentLocks::new(stripes),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<NodeDocument>> {
        self.read().documents.get(id).cloned()
    }

    /// Returns the cached document or loads it. Missing documents are not
    /// cached.
    pub(crate) fn get_or_load<F>(&self, id: &str, load: F) -> StoreResult<Option<Arc<NodeDocument>>>
    where
        F: FnOnce() -> StoreResult<Option<NodeDocument>>,
    {
        if let Some(doc) = self.get(id) {
            return Ok(Some(doc));
        }
        let _guard = self.locks.acquire(id);
        if let Some(doc) = self.get(id) {
            return Ok(Some(doc));
        }
        let Some(doc) = load()? else {
            return Ok(None);
        };
        let doc = Arc::new(doc);
        self.write().insert(Arc::clone(&doc), self.capacity);
        Ok(Some(doc))
    }

    /// Caches `doc` unless a newer copy is cached already.
    pub(crate) fn put(&self, doc: NodeDocument) -> Arc<NodeDocument> {
        let _guard = self.locks.acquire(doc.id());
        self.put_locked(Arc::new(doc))
    }

    fn put_locked(&self, doc: Arc<NodeDocument>) -> Arc<NodeDocument> {
        let mut entries = self.write();
        match entries.documents.get(doc.id()) {
            Some(cached) if cached.mod_count() > doc.mod_count() => Arc::clone(cached),
            _ => {
                entries.insert(Arc::clone(&doc), self.capacity);
                doc
            }
        }
    }

    /// Caches the result of applying `op` to `before`, the backend copy
    /// returned by the update.
    pub(crate) fn apply_update(
        &self,
        before: Option<&Document>,
        op: &UpdateOp,
    ) -> StoreResult<Arc<NodeDocument>> {
        let mut after = before.cloned().unwrap_or_else(|| Document::new(op.id()));
        op.apply_to(&mut after);
        let after = NodeDocument::from_document(after)?;
        let _guard = self.locks.acquire(op.id());
        Ok(self.put_locked(Arc::new(after)))
    }

    pub(crate) fn invalidate(&self, id: &str) {
        let _guard = self.locks.acquire(id);
        let mut entries = self.write();
        if entries.documents.remove(id).is_some() {
            entries.order.retain(|cached| cached != id);
        }
    }

    /// Drops every entry but `keep`.
    pub(crate) fn invalidate_all_except(&self, keep: &str) -> usize {
        let mut entries = self.write();
        let before = entries.documents.len();
        entries.documents.retain(|id, _| id == keep);
        let Entries { documents, order } = &mut *entries;
        order.retain(|id| documents.contains_key(id));
        before - documents.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().documents.len()
    }
}
