//! Cache of resolved commit revisions
//!
//! Once a change is committed its commit revision never changes, so a
//! lookup that had to reach a commit root or a previous document is
//! remembered by revision. Pending changes are never cached.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::revision::Revision;

#[derive(Debug, Default)]
struct Inner {
    commits: HashMap<Revision, Revision>,
    order: VecDeque<Revision>,
}

/// Commit revision by change revision, evicted first in, first out.
#[derive(Debug)]
pub struct CommitValueCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl CommitValueCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, rev: &Revision) -> Option<Revision> {
        self.inner().commits.get(rev).copied()
    }

    pub fn insert(&self, rev: Revision, commit_revision: Revision) {
        let mut inner = self.inner();
        if inner.commits.insert(rev, commit_revision).is_none() {
            inner.order.push_back(rev);
        }
        while inner.commits.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.commits.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner().commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
