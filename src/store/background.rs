//! Background operations
//!
//! - Write: publish unsaved `_lastRev` entries, deepest path first and
//!   the root last, then split documents this member changed
//! - Read: merge the `_lastRev` entries published on the root document
//!   into the head vector and drop cached state the new head invalidates
//!
//! Both are idempotent. A failed run leaves its pending work for the
//! next one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::node_store::{lock, StoreInner};
use crate::backend::{Collection, UpdateOp};
use crate::cluster::ClusterView;
use crate::document::{
    id_from_path, split_operations, NodeDocument, Path, SplitThresholds, LAST_REV,
};
use crate::errors::{StoreError, StoreResult};
use crate::locks::ROOT_ID;
use crate::observability::{Event, Logger, ObservationScope};
use crate::resolver::RevisionContext;
use crate::revision::{Revision, RevisionVector};

impl StoreInner {
    /// Renews the lease, then runs background write and read. Failures are
    /// counted and returned; the work is retried on the next run.
    pub(super) fn run_background_operations(&self) -> StoreResult<()> {
        let _running = lock(&self.background_mutex);
        let result = self
            .renew_lease()
            .and_then(|()| self.background_write())
            .and_then(|()| self.background_read());
        if let Err(err) = &result {
            self.metrics.increment_background_failures();
            Logger::error(
                Event::BackgroundFailed.as_str(),
                &[("code", err.code()), ("error", &err.to_string())],
            );
        }
        result
    }

    fn renew_lease(&self) -> StoreResult<()> {
        lock(&self.cluster_info).renew_lease(&*self.backend, &*self.clock)?;
        Ok(())
    }

    pub(super) fn background_write(&self) -> StoreResult<()> {
        let scope = ObservationScope::new(Event::BackgroundWrite.as_str());
        let result = self
            .write_last_revs()
            .and_then(|written| Ok((written, self.split_documents()?)));
        match result {
            Ok((written, splits)) => {
                self.metrics.increment_background_writes();
                let written = written.to_string();
                let splits = splits.to_string();
                scope.complete_with_fields(&[
                    ("last_revs", written.as_str()),
                    ("splits", splits.as_str()),
                ]);
                Ok(())
            }
            Err(err) => {
                scope.fail(err.severity(), &err.to_string());
                Err(err)
            }
        }
    }

    fn write_last_revs(&self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut *lock(&self.unsaved_last_revs));
        let mut ordered: Vec<(Path, Revision)> = pending.into_iter().collect();
        ordered.sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()));

        let cluster_id = self.revision_clock.cluster_id().to_string();
        for (index, (path, revision)) in ordered.iter().enumerate() {
            let mut op = UpdateOp::new(id_from_path(path), false);
            op.max_revision_entry(LAST_REV, cluster_id.as_str(), *revision);
            let written = self
                .with_retry("create_or_update", || {
                    self.backend.create_or_update(Collection::Nodes, &op)
                })
                .and_then(|before| self.documents.apply_update(before.as_ref(), &op));
            if let Err(err) = written {
                self.restore_unsaved(&ordered[index..]);
                return Err(err);
            }
        }
        Ok(ordered.len())
    }

    /// Puts entries back after a failed write, keeping newer ones recorded
    /// in the meantime.
    fn restore_unsaved(&self, entries: &[(Path, Revision)]) {
        let mut unsaved = lock(&self.unsaved_last_revs);
        for (path, revision) in entries {
            unsaved
                .entry(path.clone())
                .and_modify(|current| {
                    if revision.is_newer_than(current) {
                        *current = *revision;
                    }
                })
                .or_insert(*revision);
        }
    }

    fn split_documents(&self) -> StoreResult<usize> {
        let candidates = std::mem::take(&mut *lock(&self.split_candidates));
        let thresholds = SplitThresholds {
            num_revs: self.config.num_revs_threshold,
            children: self.config.children_threshold,
        };
        let mut splits = 0;
        let mut remaining = candidates.into_iter();
        while let Some(id) = remaining.next() {
            match self.split_document(&id, &thresholds) {
                Ok(true) => splits += 1,
                Ok(false) => {}
                Err(err) => {
                    let mut pending = lock(&self.split_candidates);
                    pending.insert(id);
                    pending.extend(remaining);
                    return Err(err);
                }
            }
        }
        Ok(splits)
    }

    /// Moves old history of this member out of document `id`. The previous
    /// document is created before the main document refers to it.
    fn split_document(&self, id: &str, thresholds: &SplitThresholds) -> StoreResult<bool> {
        let Some(doc) = self.find_document(id)? else {
            return Ok(false);
        };
        let cluster_id = self.revision_clock.cluster_id();
        let split = split_operations(&doc, cluster_id, thresholds, |rev| {
            self.resolver.is_committed(self, &doc, rev)
        })?;
        let Some(split) = split else {
            return Ok(false);
        };

        let previous_id = split.previous.id().to_string();
        let created = self.with_retry("create", || {
            self.backend
                .create(Collection::Nodes, std::slice::from_ref(&split.previous))
        })?;
        if !created {
            Logger::warn(
                Event::DocumentSplit.as_str(),
                &[
                    ("id", id),
                    ("previous", previous_id.as_str()),
                    ("reason", "previous document exists"),
                ],
            );
        }
        let before = self.with_retry("create_or_update", || {
            self.backend.create_or_update(Collection::Nodes, &split.main)
        })?;
        self.documents.apply_update(before.as_ref(), &split.main)?;
        if let Some(cache) = self.resolver.no_prop_cache() {
            cache.invalidate_document(id);
        }

        self.metrics.increment_splits();
        let moved = split.moved_revisions.to_string();
        let range = split.range.to_string();
        Logger::info(
            Event::DocumentSplit.as_str(),
            &[
                ("id", id),
                ("previous", previous_id.as_str()),
                ("range", range.as_str()),
                ("revisions", moved.as_str()),
            ],
        );
        Ok(true)
    }

    pub(super) fn background_read(&self) -> StoreResult<()> {
        let scope = ObservationScope::new(Event::BackgroundRead.as_str());
        match self.read_published_revisions() {
            Ok(head) => {
                self.metrics.increment_background_reads();
                let head = head.to_string();
                scope.complete_with_fields(&[("head", head.as_str())]);
                Ok(())
            }
            Err(err) => {
                scope.fail(err.severity(), &err.to_string());
                Err(err)
            }
        }
    }

    fn read_published_revisions(&self) -> StoreResult<RevisionVector> {
        let _exclusive = self
            .background_op_lock
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        self.metrics.increment_backend_finds();
        let root = self
            .with_retry("find", || self.backend.find(Collection::Nodes, ROOT_ID))?
            .ok_or_else(|| StoreError::invariant_violation(ROOT_ID, "root document missing"))?;
        let root = NodeDocument::from_document(root)?;
        let published = RevisionVector::new(root.last_rev().values().copied());
        if let Some(own) = published.get(self.revision_clock.cluster_id()) {
            self.revision_clock.observe(own);
        }

        let (head, changed) = {
            let mut head = self.head.write().unwrap_or_else(PoisonError::into_inner);
            let next = head.pmax(&published);
            let changed = next != *head;
            *head = next.clone();
            (next, changed)
        };
        self.documents.put(root);
        if changed {
            self.documents.invalidate_all_except(ROOT_ID);
            if let Some(cache) = self.resolver.no_prop_cache() {
                cache.retain_valid(&head);
            }
        }

        let view = ClusterView::read(&*self.backend)?;
        *self
            .cluster_view
            .write()
            .unwrap_or_else(PoisonError::into_inner) = view;
        Ok(head)
    }

    /// Pending `_lastRev` entries by path. Exposed for diagnostics.
    pub(super) fn unsaved_last_revs(&self) -> BTreeMap<Path, Revision> {
        lock(&self.unsaved_last_revs).clone()
    }
}

/// Thread running background operations every `delay` until stopped or
/// the store is gone.
pub(crate) struct BackgroundWorker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    pub(super) fn spawn(inner: Weak<StoreInner>, delay: Duration) -> StoreResult<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("revstore-background".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if inner.ensure_open().is_err() {
                    break;
                }
                // counted and logged, retried on the next run
                let _ = inner.run_background_operations();
            })
            .map_err(|e| {
                StoreError::invalid_argument(format!("failed to spawn background thread: {}", e))
            })?;
        Ok(Self { stop, handle })
    }

    /// Stops the thread and waits for a running pass to finish.
    pub(super) fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            Logger::error(
                Event::BackgroundFailed.as_str(),
                &[("reason", "background thread panicked")],
            );
        }
    }
}

impl fmt::Debug for BackgroundWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("thread", &self.handle.thread().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::{DocumentStore, MemoryDocumentStore};
    use crate::revision::VirtualClock;
    use crate::store::{DocumentNodeStore, PropertyValue};

    use super::*;

    fn member(backend: &Arc<MemoryDocumentStore>, clock: &Arc<VirtualClock>, id: u32) -> DocumentNodeStore {
        DocumentNodeStore::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .cluster_id(id)
            .async_delay(Duration::ZERO)
            .num_revs_threshold(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_last_rev_written_deepest_first_root_last() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let ns = member(&backend, &clock, 1);
        let mut builder = ns.get_root().unwrap().builder();
        builder.add_node("/a/b").unwrap();
        ns.merge(&builder).unwrap();
        assert_eq!(ns.inner.unsaved_last_revs().len(), 3);

        ns.run_background_operations().unwrap();
        assert!(ns.inner.unsaved_last_revs().is_empty());
        let doc = backend.find(Collection::Nodes, "2:/a/b").unwrap().unwrap();
        assert!(doc.map_entry(LAST_REV, "1").is_some());
        let root = backend.find(Collection::Nodes, ROOT_ID).unwrap().unwrap();
        assert_eq!(
            root.map_entry(LAST_REV, "1"),
            doc.map_entry(LAST_REV, "1")
        );
    }

    #[test]
    fn test_changes_visible_after_write_then_read() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let a = member(&backend, &clock, 1);
        let b = member(&backend, &clock, 2);

        let mut builder = a.get_root().unwrap().builder();
        builder.set_property("/", "x", 7).unwrap();
        a.merge(&builder).unwrap();

        b.run_background_operations().unwrap();
        assert!(!b.get_root().unwrap().has_property("x"));

        a.run_background_operations().unwrap();
        assert!(!b.get_root().unwrap().has_property("x"));

        b.run_background_operations().unwrap();
        assert_eq!(
            b.get_root().unwrap().property("x"),
            Some(&PropertyValue::Long(7))
        );
    }

    #[test]
    fn test_split_moves_history_of_root() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let ns = member(&backend, &clock, 1);
        for i in 0..8 {
            let mut builder = ns.get_root().unwrap().builder();
            builder.set_property("/", "p", i).unwrap();
            ns.merge(&builder).unwrap();
        }
        ns.run_background_operations().unwrap();
        assert_eq!(ns.metrics().snapshot().splits, 1);

        let root = backend.find(Collection::Nodes, ROOT_ID).unwrap().unwrap();
        let root = NodeDocument::from_document(root).unwrap();
        assert!(root.has_previous());
        assert_eq!(root.local_map("p").map(|m| m.len()), Some(1));
        assert_eq!(
            ns.get_root().unwrap().property("p"),
            Some(&PropertyValue::Long(7))
        );
    }
}
