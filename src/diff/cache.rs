//! Diff caches
//!
//! Memoize the child-name changes of one path between two reader
//! vectors, rendered as JSOP.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::document::Path;
use crate::revision::RevisionVector;

/// Memoized diffs keyed by `(path, from, to)`.
pub trait DiffCache: Send + Sync + fmt::Debug {
    fn get(&self, path: &Path, from: &RevisionVector, to: &RevisionVector) -> Option<String>;

    fn put(&self, path: &Path, from: &RevisionVector, to: &RevisionVector, diff: String);
}

type DiffKey = (String, String, String);

fn key(path: &Path, from: &RevisionVector, to: &RevisionVector) -> DiffKey {
    (path.to_string(), from.to_string(), to.to_string())
}

#[derive(Debug, Default)]
struct Entries {
    diffs: HashMap<DiffKey, String>,
    order: VecDeque<DiffKey>,
}

/// Bounded in-memory diff cache, evicting first in, first out.
#[derive(Debug)]
pub struct MemoryDiffCache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryDiffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl DiffCache for MemoryDiffCache {
    fn get(&self, path: &Path, from: &RevisionVector, to: &RevisionVector) -> Option<String> {
        let found = self.entries().diffs.get(&key(path, from, to)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn put(&self, path: &Path, from: &RevisionVector, to: &RevisionVector, diff: String) {
        let key = key(path, from, to);
        let mut entries = self.entries();
        if entries.diffs.insert(key.clone(), diff).is_none() {
            entries.order.push_back(key);
        }
        while entries.diffs.len() > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.diffs.remove(&oldest);
        }
    }
}

/// A diff cache that remembers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmnesiaDiffCache;

impl DiffCache for AmnesiaDiffCache {
    fn get(&self, _path: &Path, _from: &RevisionVector, _to: &RevisionVector) -> Option<String> {
        None
    }

    fn put(&self, _path: &Path, _from: &RevisionVector, _to: &RevisionVector, _diff: String) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::Revision;

    fn v(ts: u64) -> RevisionVector {
        RevisionVector::new([Revision::new(ts, 0, 1)])
    }

    #[test]
    fn test_memory_cache_hit_and_miss() {
        let cache = MemoryDiffCache::new(10);
        let root = Path::root();
        assert_eq!(cache.get(&root, &v(1), &v(2)), None);
        cache.put(&root, &v(1), &v(2), "+\"a\":{}".to_string());
        assert_eq!(cache.get(&root, &v(1), &v(2)).as_deref(), Some("+\"a\":{}"));
        assert_eq!(cache.get(&root, &v(2), &v(1)), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_memory_cache_evicts_oldest() {
        let cache = MemoryDiffCache::new(2);
        let root = Path::root();
        for ts in 1..=3 {
            cache.put(&root, &v(ts), &v(ts + 1), String::new());
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&root, &v(1), &v(2)), None);
        assert!(cache.get(&root, &v(3), &v(4)).is_some());
    }

    #[test]
    fn test_amnesia_cache_always_misses() {
        let cache = AmnesiaDiffCache;
        cache.put(&Path::root(), &v(1), &v(2), "x".to_string());
        assert_eq!(cache.get(&Path::root(), &v(1), &v(2)), None);
    }
}
