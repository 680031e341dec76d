//! Observable events of the node store
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Node store initialization begins
    StoreStart,
    /// Node store is ready
    StoreReady,
    /// Node store disposed
    StoreDisposed,

    // Cluster membership
    /// Cluster id lease acquired
    LeaseAcquired,
    /// Cluster id lease renewed
    LeaseRenewed,
    /// Lease renewal failed
    LeaseRenewFailed,
    /// Cluster id released on shutdown
    LeaseReleased,

    // Commits
    /// Merge committed
    MergeCommit,
    /// Merge rejected with a conflict
    MergeConflict,
    /// Phase A changes rolled back
    MergeRollback,

    // Background operations
    /// Unsaved `_lastRev` entries flushed
    BackgroundWrite,
    /// Remote changes pulled into the head
    BackgroundRead,
    /// Background operation failed
    BackgroundFailed,

    // Backend
    /// Transient backend failure, call is retried
    BackendRetry,
    /// Retries of a transient backend failure exhausted
    BackendRetryExhausted,

    // History
    /// Document history split into a previous document
    DocumentSplit,
    /// Previous document chain scanned
    PreviousDocumentScan,
    /// Unresolvable commit marker found in history
    InvariantViolation,

    // Cluster lock
    /// Cluster lock acquired
    LockAcquired,
    /// Cluster lock released
    LockReleased,
    /// Unlock with a token that no longer holds the lock
    LockStaleUnlock,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreStart => "NODE_STORE_STARTUP_BEGIN",
            Event::StoreReady => "NODE_STORE_READY",
            Event::StoreDisposed => "NODE_STORE_DISPOSED",

            Event::LeaseAcquired => "CLUSTER_LEASE_ACQUIRED",
            Event::LeaseRenewed => "CLUSTER_LEASE_RENEWED",
            Event::LeaseRenewFailed => "CLUSTER_LEASE_RENEW_FAILED",
            Event::LeaseReleased => "CLUSTER_LEASE_RELEASED",

            Event::MergeCommit => "MERGE_COMMIT",
            Event::MergeConflict => "MERGE_CONFLICT",
            Event::MergeRollback => "MERGE_ROLLBACK",

            Event::BackgroundWrite => "BACKGROUND_WRITE",
            Event::BackgroundRead => "BACKGROUND_READ",
            Event::BackgroundFailed => "BACKGROUND_FAILED",

            Event::BackendRetry => "BACKEND_RETRY",
            Event::BackendRetryExhausted => "BACKEND_RETRY_EXHAUSTED",

            Event::DocumentSplit => "DOCUMENT_SPLIT",
            Event::PreviousDocumentScan => "PREVIOUS_DOCUMENT_SCAN",
            Event::InvariantViolation => "INVARIANT_VIOLATION",

            Event::LockAcquired => "CLUSTER_LOCK_ACQUIRED",
            Event::LockReleased => "CLUSTER_LOCK_RELEASED",
            Event::LockStaleUnlock => "CLUSTER_LOCK_STALE_UNLOCK",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::InvariantViolation)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
