//! Clocks and revision allocation
//!
//! Wall clock time is used for revision timestamps and lease expiry only,
//! never for ordering decisions across cluster members.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;

use super::Revision;

/// Source of milliseconds since the epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// A manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    /// Moves the clock forward to `millis`. Never moves it backwards.
    pub fn wait_until(&self, millis: u64) {
        self.now.fetch_max(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Allocates strictly increasing revisions for one cluster member.
///
/// Within one member revisions are linearized: a clock that stands still or
/// moves backwards bumps the counter instead of reusing a timestamp.
#[derive(Debug)]
pub struct RevisionClock {
    cluster_id: u32,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<Revision>>,
}

impl RevisionClock {
    pub fn new(cluster_id: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            cluster_id,
            clock,
            last: Mutex::new(None),
        }
    }

    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns a revision newer than every revision returned before.
    pub fn new_revision(&self) -> Revision {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now_millis();
        let next = match *last {
            Some(prev) if now <= prev.timestamp() => {
                Revision::new(prev.timestamp(), prev.counter() + 1, self.cluster_id)
            }
            _ => Revision::new(now, 0, self.cluster_id),
        };
        *last = Some(next);
        next
    }

    /// Makes sure future revisions are newer than `seen`, e.g. after
    /// reading this member's own revisions back from a previous run.
    pub fn observe(&self, seen: Revision) {
        if seen.cluster_id() != self.cluster_id {
            return;
        }
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(prev) if !seen.is_newer_than(&prev) => {}
            _ => *last = Some(seen.as_trunk()),
        }
    }
}
