//! Negative-result cache for previous document scans
//!
//! Remembers that a full scan of the previous documents of one document
//! found no visible committed value of a property. An entry stays valid
//! while:
//! - the document's `_prev` set is unchanged
//! - for every member owning a previous range, the reader's visible part
//!   of that member's history (`min(vector[c], newest high of c)`) is
//!   the part the scan saw
//!
//! Entries are evicted first in, first out once the capacity is reached.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::document::{NodeDocument, PreviousFingerprint};
use crate::revision::{Revision, RevisionVector};

/// Visible part of each member's previous history under one vector.
pub type VisibleBounds = BTreeMap<u32, Option<Revision>>;

type CacheKey = (String, String);

#[derive(Debug, Clone)]
struct Entry {
    fingerprint: PreviousFingerprint,
    newest_highs: BTreeMap<u32, Revision>,
    bounds: VisibleBounds,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    order: VecDeque<CacheKey>,
}

/// Newest high revision of the previous ranges of each member.
pub fn newest_highs(doc: &NodeDocument) -> BTreeMap<u32, Revision> {
    let mut highs: BTreeMap<u32, Revision> = BTreeMap::new();
    for range in doc.previous_ranges() {
        highs
            .entry(range.cluster_id())
            .and_modify(|high| {
                if range.high.is_newer_than(high) {
                    *high = range.high;
                }
            })
            .or_insert(range.high);
    }
    highs
}

fn bounds_for(highs: &BTreeMap<u32, Revision>, vector: &RevisionVector) -> VisibleBounds {
    highs
        .iter()
        .map(|(cluster_id, high)| {
            let bound = vector.get(*cluster_id).map(|seen| {
                if seen.is_newer_than(high) {
                    *high
                } else {
                    seen
                }
            });
            (*cluster_id, bound)
        })
        .collect()
}

/// Visible bounds of `doc`'s previous history under `vector`.
pub fn visible_bounds(doc: &NodeDocument, vector: &RevisionVector) -> VisibleBounds {
    bounds_for(&newest_highs(doc), vector)
}

/// Per-process cache of confirmed absences in previous documents.
#[derive(Debug)]
pub struct PrevNoPropCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl PrevNoPropCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if a scan of `doc`'s previous documents under `vector` is
    /// known to find nothing for `name`.
    pub fn is_absent(&self, doc: &NodeDocument, name: &str, vector: &RevisionVector) -> bool {
        let key = (doc.id().to_string(), name.to_string());
        let inner = self.inner();
        match inner.entries.get(&key) {
            Some(entry) => {
                entry.fingerprint == doc.previous_fingerprint()
                    && entry.bounds == bounds_for(&entry.newest_highs, vector)
            }
            None => false,
        }
    }

    /// Records that a full scan under `vector` found nothing for `name`.
    pub fn record_absent(&self, doc: &NodeDocument, name: &str, vector: &RevisionVector) {
        let key = (doc.id().to_string(), name.to_string());
        let newest_highs = newest_highs(doc);
        let entry = Entry {
            fingerprint: doc.previous_fingerprint(),
            bounds: bounds_for(&newest_highs, vector),
            newest_highs,
        };
        let mut inner = self.inner();
        if inner.entries.insert(key.clone(), entry).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drops the entry of one property. Called when a value was found.
    pub fn invalidate(&self, id: &str, name: &str) {
        let key = (id.to_string(), name.to_string());
        let mut inner = self.inner();
        if inner.entries.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }
    }

    /// Drops all entries of a document. Called when a previous document
    /// was created for it.
    pub fn invalidate_document(&self, id: &str) {
        let mut inner = self.inner();
        inner.entries.retain(|(doc_id, _), _| doc_id != id);
        inner.order.retain(|(doc_id, _)| doc_id != id);
    }

    /// Drops entries that can no longer match a reader at `head` or later.
    /// Called after the head vector advanced.
    pub fn retain_valid(&self, head: &RevisionVector) -> usize {
        let mut inner = self.inner();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| entry.bounds == bounds_for(&entry.newest_highs, head));
        let Inner { entries, order } = &mut *inner;
        order.retain(|key| entries.contains_key(key));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
