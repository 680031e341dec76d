//! Backend wrappers shared by the integration tests
//!
//! - `CountingDocumentStore` counts `find` calls per collection
//! - `PausableDocumentStore` blocks one write until the test resumes it

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use revstore::backend::{BackendResult, Collection, Document, DocumentStore, UpdateOp};
use revstore::revision::VirtualClock;

/// Start time of virtual clocks in tests.
pub const START_MILLIS: u64 = 1_700_000_000_000;

pub fn virtual_clock() -> Arc<VirtualClock> {
    Arc::new(VirtualClock::new(START_MILLIS))
}

// =============================================================================
// CountingDocumentStore
// =============================================================================

pub struct CountingDocumentStore {
    inner: Arc<dyn DocumentStore>,
    finds: [AtomicUsize; Collection::COUNT],
}

impl CountingDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            finds: Default::default(),
        }
    }

    pub fn find_count(&self, collection: Collection) -> usize {
        self.finds[collection.index()].load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in &self.finds {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

impl DocumentStore for CountingDocumentStore {
    fn find(&self, collection: Collection, id: &str) -> BackendResult<Option<Document>> {
        self.finds[collection.index()].fetch_add(1, Ordering::SeqCst);
        self.inner.find(collection, id)
    }

    fn query(
        &self,
        collection: Collection,
        from_id: &str,
        to_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Document>> {
        self.inner.query(collection, from_id, to_id, limit)
    }

    fn create(&self, collection: Collection, ops: &[UpdateOp]) -> BackendResult<bool> {
        self.inner.create(collection, ops)
    }

    fn create_or_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        self.inner.create_or_update(collection, op)
    }

    fn find_and_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        self.inner.find_and_update(collection, op)
    }

    fn remove(&self, collection: Collection, ids: &[String]) -> BackendResult<usize> {
        self.inner.remove(collection, ids)
    }
}

// =============================================================================
// PausableDocumentStore
// =============================================================================

struct PausePoint {
    collection: Collection,
    id: String,
    remaining: usize,
    reached: Sender<()>,
    resume: Receiver<()>,
}

/// Test side of a pause point.
pub struct PauseHandle {
    reached: Receiver<()>,
    resume: Sender<()>,
}

impl PauseHandle {
    /// True once the paused write is blocked.
    pub fn wait_reached(&self, timeout: Duration) -> bool {
        self.reached.recv_timeout(timeout).is_ok()
    }

    /// Lets the paused write proceed.
    pub fn resume(&self) {
        let _ = self.resume.send(());
    }
}

pub struct PausableDocumentStore {
    inner: Arc<dyn DocumentStore>,
    pause: Mutex<Option<PausePoint>>,
}

impl PausableDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            pause: Mutex::new(None),
        }
    }

    /// Blocks the `nth` write (counted from now, starting at 1) to `id`
    /// until the handle resumes it or is dropped.
    pub fn pause_before_write(&self, collection: Collection, id: &str, nth: usize) -> PauseHandle {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.pause.lock().unwrap_or_else(PoisonError::into_inner) = Some(PausePoint {
            collection,
            id: id.to_string(),
            remaining: nth.max(1),
            reached: reached_tx,
            resume: resume_rx,
        });
        PauseHandle {
            reached: reached_rx,
            resume: resume_tx,
        }
    }

    fn before_write(&self, collection: Collection, id: &str) {
        let triggered = {
            let mut pause = self.pause.lock().unwrap_or_else(PoisonError::into_inner);
            let hit = match pause.as_mut() {
                Some(point) if point.collection == collection && point.id == id => {
                    point.remaining -= 1;
                    point.remaining == 0
                }
                _ => false,
            };
            if hit {
                pause.take()
            } else {
                None
            }
        };
        if let Some(point) = triggered {
            let _ = point.reached.send(());
            let _ = point.resume.recv_timeout(Duration::from_secs(30));
        }
    }
}

impl DocumentStore for PausableDocumentStore {
    fn find(&self, collection: Collection, id: &str) -> BackendResult<Option<Document>> {
        self.inner.find(collection, id)
    }

    fn query(
        &self,
        collection: Collection,
        from_id: &str,
        to_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Document>> {
        self.inner.query(collection, from_id, to_id, limit)
    }

    fn create(&self, collection: Collection, ops: &[UpdateOp]) -> BackendResult<bool> {
        for op in ops {
            self.before_write(collection, op.id());
        }
        self.inner.create(collection, ops)
    }

    fn create_or_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        self.before_write(collection, op.id());
        self.inner.create_or_update(collection, op)
    }

    fn find_and_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>> {
        self.before_write(collection, op.id());
        self.inner.find_and_update(collection, op)
    }

    fn remove(&self, collection: Collection, ids: &[String]) -> BackendResult<usize> {
        self.inner.remove(collection, ids)
    }
}
