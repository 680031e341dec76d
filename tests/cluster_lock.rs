//! Cluster-wide named locks
//!
//! At most one valid token per name at any time, stale unlocks are
//! no-ops, and expired leases are free.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::virtual_clock;
use revstore::backend::MemoryDocumentStore;
use revstore::revision::{Clock, SystemClock};
use revstore::{ClusterNodeStoreLock, DocumentNodeStore};

const THREADS: usize = 100;
const ITERATIONS: usize = 100;

fn lock_for(backend: &Arc<MemoryDocumentStore>, clock: Arc<dyn Clock>, cluster_id: u32) -> ClusterNodeStoreLock {
    ClusterNodeStoreLock::new(backend.clone(), clock, cluster_id)
        .with_lease(Duration::from_secs(60))
        .with_acquire_timeout(Duration::from_secs(120))
}

/// 100 threads × 100 lock/unlock cycles on one name, spread over four
/// members. No failure, no double acquisition.
#[test]
fn test_concurrent_lock_unlock_stress() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let locks: Vec<ClusterNodeStoreLock> = (1..=4)
        .map(|id| lock_for(&backend, Arc::new(SystemClock), id))
        .collect();
    let held = AtomicBool::new(false);
    let acquisitions = AtomicUsize::new(0);

    thread::scope(|scope| {
        for t in 0..THREADS {
            let lock = &locks[t % locks.len()];
            let held = &held;
            let acquisitions = &acquisitions;
            scope.spawn(move || {
                for _ in 0..ITERATIONS {
                    let token = lock.lock("stress").unwrap();
                    assert!(!held.swap(true, Ordering::SeqCst), "lock held twice");
                    acquisitions.fetch_add(1, Ordering::SeqCst);
                    held.store(false, Ordering::SeqCst);
                    assert!(lock.unlock(&token).unwrap());
                }
            });
        }
    });

    assert_eq!(acquisitions.load(Ordering::SeqCst), THREADS * ITERATIONS);
    assert!(!locks[0].is_locked("stress").unwrap());
}

/// Unlocking with a token that no longer holds the lock leaves the
/// current holder alone.
#[test]
fn test_stale_unlock_is_noop() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let a = lock_for(&backend, clock.clone(), 1);
    let b = lock_for(&backend, clock.clone(), 2);

    let first = a.lock("task").unwrap();
    assert!(a.unlock(&first).unwrap());
    let second = b.lock("task").unwrap();

    assert!(!a.unlock(&first).unwrap());
    assert!(b.is_locked("task").unwrap());
    assert!(a.try_lock("task").unwrap().is_none());
    assert!(b.unlock(&second).unwrap());
    assert!(!b.unlock(&second).unwrap());
}

/// A holder that never unlocks blocks others only until its lease ends.
#[test]
fn test_expired_lease_is_acquirable() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let crashed = lock_for(&backend, clock.clone(), 1);
    let other = lock_for(&backend, clock.clone(), 2);

    let _abandoned = crashed.lock("task").unwrap();
    assert!(other.try_lock("task").unwrap().is_none());

    clock.advance(Duration::from_secs(59));
    assert!(other.try_lock("task").unwrap().is_none());

    clock.advance(Duration::from_secs(2));
    assert!(!other.is_locked("task").unwrap());
    let token = other.try_lock("task").unwrap().unwrap();
    assert!(other.is_locked("task").unwrap());
    assert!(other.unlock(&token).unwrap());
}

/// Locks handed out by node stores on one backend exclude each other and
/// count in the store metrics.
#[test]
fn test_node_store_locks_share_backend() {
    let backend = Arc::new(MemoryDocumentStore::new());
    let clock = virtual_clock();
    let build = |id| {
        DocumentNodeStore::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .cluster_id(id)
            .async_delay(Duration::ZERO)
            .build()
            .unwrap()
    };
    let ns1 = build(1);
    let ns2 = build(2);

    let token = ns1.cluster_lock().lock("gc").unwrap();
    assert!(ns2.cluster_lock().try_lock("gc").unwrap().is_none());
    assert!(ns2.cluster_lock().is_locked("gc").unwrap());
    assert!(ns1.cluster_lock().unlock(&token).unwrap());
    assert!(ns2.cluster_lock().try_lock("gc").unwrap().is_some());

    assert_eq!(ns1.metrics().snapshot().lock_acquisitions, 1);
    assert_eq!(ns2.metrics().snapshot().lock_acquisitions, 1);
}
