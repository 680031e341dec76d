//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase, reset only on process start
//! - Thread-safe, lock-free

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one node store instance.
///
/// All counters use Relaxed ordering; they are observational only and never
/// feed back into store decisions.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    commits: AtomicU64,
    conflicts: AtomicU64,
    backend_finds: AtomicU64,
    previous_document_reads: AtomicU64,
    no_prop_cache_hits: AtomicU64,
    no_prop_cache_misses: AtomicU64,
    splits: AtomicU64,
    background_writes: AtomicU64,
    background_reads: AtomicU64,
    background_failures: AtomicU64,
    lock_acquisitions: AtomicU64,
    lock_contentions: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_commits(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conflicts(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a backend `find` issued for a main document.
    pub fn increment_backend_finds(&self) {
        self.backend_finds.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a backend lookup of a previous document.
    pub fn increment_previous_document_reads(&self) {
        self.previous_document_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_no_prop_cache_hits(&self) {
        self.no_prop_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_no_prop_cache_misses(&self) {
        self.no_prop_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_splits(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_background_writes(&self) {
        self.background_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_background_reads(&self) {
        self.background_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_background_failures(&self) {
        self.background_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lock_acquisitions(&self) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a lock attempt that found the lease held or lost a CAS race.
    pub fn increment_lock_contentions(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of previous documents read so far.
    pub fn previous_document_reads(&self) -> u64 {
        self.previous_document_reads.load(Ordering::Relaxed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            backend_finds: self.backend_finds.load(Ordering::Relaxed),
            previous_document_reads: self.previous_document_reads.load(Ordering::Relaxed),
            no_prop_cache_hits: self.no_prop_cache_hits.load(Ordering::Relaxed),
            no_prop_cache_misses: self.no_prop_cache_misses.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            background_writes: self.background_writes.load(Ordering::Relaxed),
            background_reads: self.background_reads.load(Ordering::Relaxed),
            background_failures: self.background_failures.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
        }
    }

    /// Current values as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub conflicts: u64,
    pub backend_finds: u64,
    pub previous_document_reads: u64,
    pub no_prop_cache_hits: u64,
    pub no_prop_cache_misses: u64,
    pub splits: u64,
    pub background_writes: u64,
    pub background_reads: u64,
    pub background_failures: u64,
    pub lock_acquisitions: u64,
    pub lock_contentions: u64,
}
