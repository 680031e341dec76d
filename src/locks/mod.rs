//! Document locks
//!
//! Serializes read-modify-write of the in-memory copy of a document.
//!
//! - A fixed pool of stripes bounds memory regardless of how many ids
//!   are locked over time
//! - The root document id has its own lock and never shares a stripe
//! - Acquire blocks and never fails: a poisoned stripe is recovered
//!
//! Callers hold at most one document lock at a time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Id of the root document, pinned to a dedicated lock.
pub const ROOT_ID: &str = "0:/";

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 4096;

/// Exclusive lock per document id.
pub trait NodeDocumentLocks: Send + Sync {
    /// Blocks until the lock for `id` is held. Released when the guard
    /// is dropped.
    fn acquire(&self, id: &str) -> DocumentLockGuard<'_>;
}

/// Holds one document lock.
#[must_use = "the lock is released when the guard is dropped"]
pub struct DocumentLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl std::fmt::Debug for DocumentLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DocumentLockGuard")
    }
}

/// Striped `NodeDocumentLocks`: `stripes[hash(id) % n]`, root apart.
#[derive(Debug)]
pub struct StripedDocumentLocks<S = BuildHasherDefault<DefaultHasher>> {
    stripes: Box<[Mutex<()>]>,
    root: Mutex<()>,
    hasher: S,
}

impl StripedDocumentLocks {
    pub fn new(stripes: usize) -> Self {
        Self::with_hasher(stripes, BuildHasherDefault::default())
    }
}

impl Default for StripedDocumentLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl<S: BuildHasher> StripedDocumentLocks<S> {
    /// A pool of `stripes` locks (at least one) using `hasher` to pick
    /// the stripe of an id.
    pub fn with_hasher(stripes: usize, hasher: S) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self {
            stripes,
            root: Mutex::new(()),
            hasher,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Stripe used for `id`, `None` for the root document.
    pub fn stripe_index(&self, id: &str) -> Option<usize> {
        if id == ROOT_ID {
            return None;
        }
        Some((self.hasher.hash_one(id) % self.stripes.len() as u64) as usize)
    }

    fn lock_for(&self, id: &str) -> &Mutex<()> {
        match self.stripe_index(id) {
            Some(index) => &self.stripes[index],
            None => &self.root,
        }
    }
}

impl<S: BuildHasher + Send + Sync> NodeDocumentLocks for StripedDocumentLocks<S> {
    fn acquire(&self, id: &str) -> DocumentLockGuard<'_> {
        let guard = self
            .lock_for(id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        DocumentLockGuard { _guard: guard }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_root_has_dedicated_lock() {
        let locks = StripedDocumentLocks::new(16);
        assert_eq!(locks.stripe_index(ROOT_ID), None);
        let index = locks.stripe_index("1:/a").unwrap();
        assert!(index < 16);
        assert_eq!(locks.stripe_index("1:/a"), Some(index));
    }

    #[test]
    fn test_root_and_colliding_key_held_together() {
        // With a single stripe every non-root id collides, the root still
        // does not.
        let locks = StripedDocumentLocks::new(1);
        let _root = locks.acquire(ROOT_ID);
        let _child = locks.acquire("1:/a");
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let locks = StripedDocumentLocks::new(0);
        assert_eq!(locks.stripe_count(), 1);
    }

    #[test]
    fn test_poisoned_stripe_recovers() {
        let locks = Arc::new(StripedDocumentLocks::new(4));
        let poisoner = Arc::clone(&locks);
        let result = thread::spawn(move || {
            let _guard = poisoner.acquire("1:/a");
            panic!("poison");
        })
        .join();
        assert!(result.is_err());
        let _guard = locks.acquire("1:/a");
    }

    #[test]
    fn test_mutual_exclusion_per_id() {
        let locks = Arc::new(StripedDocumentLocks::new(8));
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = locks.acquire("2:/a/b");
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
