//! Striped document locks under load

use std::collections::hash_map::DefaultHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::Rng;
use revstore::locks::{NodeDocumentLocks, StripedDocumentLocks, ROOT_ID};

const THREADS: usize = 100;
const ITERATIONS: usize = 100;
const KEYS: usize = 32;

fn key(index: usize) -> String {
    if index == 0 {
        ROOT_ID.to_string()
    } else {
        format!("1:/n{}", index)
    }
}

/// 100 threads × 100 iterations over random keys, root included, with
/// the root taken before a keyed lock when both are needed. Completes
/// without deadlock and never has two holders of one key.
#[test]
fn test_random_keys_stress() {
    let locks = Arc::new(StripedDocumentLocks::new(8));
    let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..KEYS).map(|_| AtomicUsize::new(0)).collect());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let holders = Arc::clone(&holders);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..ITERATIONS {
                    let index = rng.gen_range(0..KEYS);
                    let with_root = index != 0 && rng.gen_bool(0.2);
                    let _root = with_root.then(|| locks.acquire(ROOT_ID));
                    let _guard = locks.acquire(&key(index));
                    assert_eq!(holders[index].fetch_add(1, Ordering::SeqCst), 0);
                    holders[index].fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Memory stays bounded by the stripe count, however many ids are used.
#[test]
fn test_stripe_count_is_fixed() {
    let locks: StripedDocumentLocks<BuildHasherDefault<DefaultHasher>> =
        StripedDocumentLocks::with_hasher(64, BuildHasherDefault::default());
    for i in 0..10_000 {
        let id = format!("1:/n{}", i);
        let index = locks.stripe_index(&id).unwrap();
        assert!(index < 64);
        drop(locks.acquire(&id));
    }
    assert_eq!(locks.stripe_count(), 64);
}
