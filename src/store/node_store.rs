//! DocumentNodeStore
//!
//! Reads resolve node states from node documents for a reader vector.
//! Writes go through a two-phase commit and become visible to other
//! members after this member's background write and their background
//! read.
//!
//! Lock order: background-operation lock, commit mutex, one document
//! stripe.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use super::background::BackgroundWorker;
use super::builder::DocumentNodeStoreBuilder;
use super::cache::DocumentCache;
use super::commit::Commit;
use super::config::StoreConfig;
use super::node_builder::{ChangeSet, NodeBuilder};
use super::node_state::NodeState;
use super::value::PropertyValue;
use crate::backend::{BackendResult, Collection, DocumentStore};
use crate::cluster::{ClusterNodeInfo, ClusterView};
use crate::diff::{
    parse_child_changes, render_child_changes, ChildChange, DiffCache, NodeStateComparator,
    NodeStateDiff,
};
use crate::document::{children_id_range, id_from_path, NodeDocument, Path};
use crate::errors::{StoreError, StoreResult};
use crate::lock::ClusterNodeStoreLock;
use crate::locks::ROOT_ID;
use crate::observability::{log_event, Event, Logger, MetricsRegistry};
use crate::resolver::{RevisionContext, RevisionResolver};
use crate::revision::{Clock, Revision, RevisionClock, RevisionVector};

/// State shared between the store handle and its background thread.
pub(crate) struct StoreInner {
    pub(super) config: StoreConfig,
    pub(super) backend: Arc<dyn DocumentStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) revision_clock: RevisionClock,
    pub(super) cluster_info: Mutex<ClusterNodeInfo>,
    pub(super) cluster_view: RwLock<ClusterView>,
    pub(super) head: RwLock<RevisionVector>,
    pub(super) root_state: Mutex<Option<NodeState>>,
    pub(super) documents: DocumentCache,
    pub(super) resolver: RevisionResolver,
    pub(super) diff_cache: Arc<dyn DiffCache>,
    pub(super) metrics: Arc<MetricsRegistry>,
    pub(super) commit_lock: Mutex<()>,
    pub(super) background_op_lock: RwLock<()>,
    pub(super) background_mutex: Mutex<()>,
    pub(super) unsaved_last_revs: Mutex<BTreeMap<Path, Revision>>,
    pub(super) split_candidates: Mutex<BTreeSet<String>>,
    pub(super) disposed: AtomicBool,
}

impl fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreInner")
            .field("cluster_id", &self.revision_clock.cluster_id())
            .field("head", &self.head())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreInner {
    pub(super) fn ensure_open(&self) -> StoreResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    pub(super) fn head(&self) -> RevisionVector {
        self.head.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs a backend call, retrying transient failures with a delay that
    /// grows with each attempt.
    pub(super) fn with_retry<T, F>(&self, operation: &str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.config.max_backend_retries => {
                    attempt += 1;
                    let attempt_str = attempt.to_string();
                    Logger::warn(
                        Event::BackendRetry.as_str(),
                        &[
                            ("operation", operation),
                            ("attempt", attempt_str.as_str()),
                            ("error", &err.to_string()),
                        ],
                    );
                    let delay = self.config.backend_retry_delay_ms * u64::from(attempt);
                    thread::sleep(Duration::from_millis(delay));
                }
                Err(err) => {
                    if err.is_transient() {
                        Logger::error(
                            Event::BackendRetryExhausted.as_str(),
                            &[("operation", operation), ("error", &err.to_string())],
                        );
                    }
                    return Err(err.into());
                }
            }
        }
    }

    fn fetch(&self, id: &str) -> StoreResult<Option<NodeDocument>> {
        self.metrics.increment_backend_finds();
        self.with_retry("find", || self.backend.find(Collection::Nodes, id))?
            .map(NodeDocument::from_document)
            .transpose()
    }

    /// Main documents of the direct children of `path`, cached.
    fn child_documents(&self, path: &Path) -> StoreResult<Vec<Arc<NodeDocument>>> {
        let (from, to) = children_id_range(path);
        let docs = self.with_retry("query", || {
            self.backend.query(Collection::Nodes, &from, &to, usize::MAX)
        })?;
        let mut children = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = NodeDocument::from_document(doc)?;
            if !doc.is_previous_document() && doc.path().is_some() {
                children.push(self.documents.put(doc));
            }
        }
        Ok(children)
    }

    pub(super) fn read_node(
        &self,
        path: &Path,
        vector: &RevisionVector,
    ) -> StoreResult<Option<NodeState>> {
        match self.find_document(&id_from_path(path))? {
            Some(doc) => self.node_from_document(&doc, path, vector),
            None => Ok(None),
        }
    }

    fn node_exists(&self, path: &Path, vector: &RevisionVector) -> StoreResult<bool> {
        match self.find_document(&id_from_path(path))? {
            Some(doc) => self.resolver.node_exists(self, &doc, vector),
            None => Ok(false),
        }
    }

    fn node_from_document(
        &self,
        doc: &NodeDocument,
        path: &Path,
        vector: &RevisionVector,
    ) -> StoreResult<Option<NodeState>> {
        if !self.resolver.node_exists(self, doc, vector)? {
            return Ok(None);
        }
        let mut properties = BTreeMap::new();
        for name in doc.property_names() {
            if let Some(encoded) = self.resolver.resolve_property(self, doc, name, vector)? {
                properties.insert(name.clone(), PropertyValue::decode(doc.id(), &encoded)?);
            }
        }
        let last_revision = self.last_revision_stamp(doc, path, vector);
        Ok(Some(NodeState::new(
            path.clone(),
            vector.clone(),
            last_revision,
            properties,
        )))
    }

    /// Per member, the newest change to the subtree of `path` that
    /// `vector` can see. Published `_lastRev` entries are combined with
    /// this member's unsaved ones.
    fn last_revision_stamp(
        &self,
        doc: &NodeDocument,
        path: &Path,
        vector: &RevisionVector,
    ) -> RevisionVector {
        let own = self.revision_clock.cluster_id();
        let unsaved = lock(&self.unsaved_last_revs).get(path).copied();
        let stamps = vector.iter().filter_map(|seen| {
            let cluster_id = seen.cluster_id();
            let mut newest = doc.last_rev().get(&cluster_id).copied();
            if cluster_id == own {
                newest = match (newest, unsaved) {
                    (Some(published), Some(pending)) if pending.is_newer_than(&published) => {
                        Some(pending)
                    }
                    (None, pending) => pending,
                    (published, _) => published,
                };
            }
            newest.map(|rev| if rev.is_newer_than(seen) { *seen } else { rev })
        });
        RevisionVector::new(stamps)
    }

    /// Root state at the head vector.
    pub(super) fn root(&self) -> StoreResult<NodeState> {
        let head = self.head();
        if let Some(root) = lock(&self.root_state).as_ref() {
            if root.root_revision() == &head {
                return Ok(root.clone());
            }
        }
        let root = self
            .read_node(&Path::root(), &head)?
            .ok_or_else(|| StoreError::invariant_violation(ROOT_ID, "root node does not exist"))?;
        let mut cached = lock(&self.root_state);
        if self.head() == head {
            *cached = Some(root.clone());
        }
        Ok(root)
    }

    pub(super) fn children(&self, parent: &NodeState) -> StoreResult<Vec<NodeState>> {
        let mut children = Vec::new();
        for doc in self.child_documents(parent.path())? {
            let Some(path) = doc.path() else {
                continue;
            };
            if let Some(child) = self.node_from_document(&doc, path, parent.root_revision())? {
                children.push(child);
            }
        }
        Ok(children)
    }

    pub(super) fn merge(&self, builder: &NodeBuilder) -> StoreResult<NodeState> {
        self.ensure_open()?;
        // Lazy values are read before any lock so slow I/O never blocks
        // other commits.
        let changes = builder.materialize()?;
        if !changes.is_empty() {
            let _background = self
                .background_op_lock
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let _commit = lock(&self.commit_lock);
            let revision = self.revision_clock.new_revision();
            let commit = self.prepare_commit(revision, builder.base(), &changes)?;
            if !commit.is_empty() {
                commit.apply(self)?;
                self.commit_succeeded(&commit);
            }
        }
        self.root()
    }

    fn prepare_commit(
        &self,
        revision: Revision,
        base: &RevisionVector,
        changes: &BTreeMap<Path, ChangeSet>,
    ) -> StoreResult<Commit> {
        let mut commit = Commit::new(revision, base.clone());
        for (path, change) in changes {
            let exists = self.node_exists(path, base)?;
            if change.removed {
                if !exists {
                    return Err(StoreError::invalid_argument(format!(
                        "cannot remove {}: node does not exist",
                        path
                    )));
                }
                self.mark_subtree_deleted(&mut commit, path, base)?;
                continue;
            }
            if change.added && !exists {
                commit.set_deleted(path, false);
            } else if !exists && !change.properties.is_empty() {
                return Err(StoreError::invalid_argument(format!(
                    "cannot set properties on {}: node does not exist",
                    path
                )));
            }
            for (name, value) in &change.properties {
                let encoded = value.as_ref().map(PropertyValue::encode).transpose()?;
                commit.update_property(path, name, encoded);
            }
        }
        Ok(commit)
    }

    fn mark_subtree_deleted(
        &self,
        commit: &mut Commit,
        path: &Path,
        base: &RevisionVector,
    ) -> StoreResult<()> {
        let mut pending = vec![path.clone()];
        while let Some(current) = pending.pop() {
            commit.set_deleted(&current, true);
            for doc in self.child_documents(&current)? {
                let Some(child) = doc.path() else {
                    continue;
                };
                if self.resolver.node_exists(self, &doc, base)? {
                    pending.push(child.clone());
                }
            }
        }
        Ok(())
    }

    fn commit_succeeded(&self, commit: &Commit) {
        let revision = commit.revision();
        {
            let mut head = self.head.write().unwrap_or_else(PoisonError::into_inner);
            *head = head.update(revision);
        }
        {
            let mut unsaved = lock(&self.unsaved_last_revs);
            for path in commit.paths() {
                for ancestor in path.ancestors_and_self() {
                    unsaved
                        .entry(ancestor)
                        .and_modify(|rev| {
                            if revision.is_newer_than(rev) {
                                *rev = revision;
                            }
                        })
                        .or_insert(revision);
                }
            }
        }
        {
            let mut candidates = lock(&self.split_candidates);
            candidates.extend(commit.paths().map(id_from_path));
            if let Some(commit_root) = commit.commit_root() {
                candidates.insert(id_from_path(&commit_root));
            }
        }
        self.metrics.increment_commits();
        let rev = revision.to_string();
        let documents = commit.paths().count().to_string();
        Logger::trace(
            Event::MergeCommit.as_str(),
            &[("revision", rev.as_str()), ("documents", documents.as_str())],
        );
    }

    fn child_changes(&self, after: &NodeState, before: &NodeState) -> StoreResult<Vec<ChildChange>> {
        let path = after.path();
        let (from, to) = (before.root_revision(), after.root_revision());
        if let Some(changes) = self
            .diff_cache
            .get(path, from, to)
            .and_then(|jsop| parse_child_changes(&jsop))
        {
            return Ok(changes);
        }

        let old: BTreeMap<String, NodeState> = self
            .children(before)?
            .into_iter()
            .map(|child| (child.name().to_string(), child))
            .collect();
        let new: BTreeMap<String, NodeState> = self
            .children(after)?
            .into_iter()
            .map(|child| (child.name().to_string(), child))
            .collect();

        let mut changes = Vec::new();
        for (name, child) in &new {
            match old.get(name) {
                None => changes.push(ChildChange::Added(name.clone())),
                Some(previous) if previous.last_revision() != child.last_revision() => {
                    changes.push(ChildChange::Changed(name.clone()))
                }
                Some(_) => {}
            }
        }
        changes.extend(
            old.keys()
                .filter(|name| !new.contains_key(*name))
                .map(|name| ChildChange::Removed(name.clone())),
        );
        self.diff_cache
            .put(path, from, to, render_child_changes(&changes));
        Ok(changes)
    }

    fn child(&self, parent: &NodeState, name: &str) -> StoreResult<Option<NodeState>> {
        self.read_node(&parent.path().child(name)?, parent.root_revision())
    }

    fn compare(
        &self,
        after: &NodeState,
        before: &NodeState,
        diff: &mut dyn NodeStateDiff,
    ) -> StoreResult<bool> {
        if after.path() != before.path() {
            return Err(StoreError::invalid_argument(format!(
                "cannot compare {} with {}",
                after.path(),
                before.path()
            )));
        }
        if after.last_revision() == before.last_revision() {
            return Ok(true);
        }

        for (name, old) in before.properties() {
            let proceed = match after.property(name) {
                None => diff.property_deleted(name, old),
                Some(new) if new != old => diff.property_changed(name, old, new),
                Some(_) => true,
            };
            if !proceed {
                return Ok(false);
            }
        }
        for (name, new) in after.properties() {
            if !before.has_property(name) && !diff.property_added(name, new) {
                return Ok(false);
            }
        }

        for change in self.child_changes(after, before)? {
            let proceed = match &change {
                ChildChange::Added(name) => match self.child(after, name)? {
                    Some(child) => diff.child_node_added(name, &child),
                    None => true,
                },
                ChildChange::Removed(name) => match self.child(before, name)? {
                    Some(child) => diff.child_node_deleted(name, &child),
                    None => true,
                },
                ChildChange::Changed(name) => {
                    match (self.child(before, name)?, self.child(after, name)?) {
                        (Some(old), Some(new)) => diff.child_node_changed(name, &old, &new),
                        _ => true,
                    }
                }
            };
            if !proceed {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl RevisionContext for StoreInner {
    fn find_document(&self, id: &str) -> StoreResult<Option<Arc<NodeDocument>>> {
        self.documents.get_or_load(id, || self.fetch(id))
    }

    fn find_previous_document(&self, id: &str) -> StoreResult<Option<NodeDocument>> {
        self.fetch(id)
    }
}

/// A cluster member's view of the shared node tree.
///
/// Dropping the store stops its background thread but keeps the cluster
/// lease until it expires. Call `dispose` to publish pending changes and
/// release the lease.
#[derive(Debug)]
pub struct DocumentNodeStore {
    pub(super) inner: Arc<StoreInner>,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl DocumentNodeStore {
    pub fn builder() -> DocumentNodeStoreBuilder {
        DocumentNodeStoreBuilder::new()
    }

    pub(super) fn from_parts(inner: Arc<StoreInner>, worker: Option<BackgroundWorker>) -> Self {
        Self {
            inner,
            worker: Mutex::new(worker),
        }
    }

    pub fn cluster_id(&self) -> u32 {
        self.inner.revision_clock.cluster_id()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    /// The head reader vector.
    pub fn head(&self) -> RevisionVector {
        self.inner.head()
    }

    /// Entries of the previous document negative-result cache, `None`
    /// when the cache is disabled.
    pub fn no_prop_cache_len(&self) -> Option<usize> {
        self.inner.resolver.no_prop_cache().map(|cache| cache.len())
    }

    pub fn get_root(&self) -> StoreResult<NodeState> {
        self.inner.ensure_open()?;
        self.inner.root()
    }

    /// The node at `path` as of the head vector.
    pub fn get_node(&self, path: &str) -> StoreResult<Option<NodeState>> {
        self.inner.ensure_open()?;
        let path: Path = path.parse()?;
        self.inner.read_node(&path, &self.inner.head())
    }

    pub fn get_node_at(&self, path: &Path, vector: &RevisionVector) -> StoreResult<Option<NodeState>> {
        self.inner.ensure_open()?;
        self.inner.read_node(path, vector)
    }

    pub fn get_child(&self, parent: &NodeState, name: &str) -> StoreResult<Option<NodeState>> {
        self.inner.ensure_open()?;
        self.inner.child(parent, name)
    }

    /// Names of the children of `parent`, sorted.
    pub fn child_names(&self, parent: &NodeState) -> StoreResult<Vec<String>> {
        self.inner.ensure_open()?;
        Ok(self
            .inner
            .children(parent)?
            .into_iter()
            .map(|child| child.name().to_string())
            .collect())
    }

    /// Commits the changes of `builder` and returns the new root state.
    ///
    /// Fails with `Conflict` if a change not visible to the builder's base
    /// touched the same property or node. The caller rebases and retries.
    pub fn merge(&self, builder: &NodeBuilder) -> StoreResult<NodeState> {
        self.inner.merge(builder)
    }

    /// Lease renewal, background write and background read, in that
    /// order. Never runs concurrently with the background thread.
    pub fn run_background_operations(&self) -> StoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.run_background_operations()
    }

    /// A lock on named tasks shared by all members of the cluster.
    pub fn cluster_lock(&self) -> ClusterNodeStoreLock {
        ClusterNodeStoreLock::new(
            Arc::clone(&self.inner.backend),
            Arc::clone(&self.inner.clock),
            self.cluster_id(),
        )
        .with_lease(Duration::from_millis(self.inner.config.lock_lease_ms))
        .with_acquire_timeout(self.inner.config.lock_acquire_timeout())
        .with_metrics(Arc::clone(&self.inner.metrics))
    }

    /// Publishes pending changes and releases the cluster lease. Later
    /// calls fail with `Disposed`; disposing twice is a no-op.
    pub fn dispose(&self) -> StoreResult<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop();
        }
        let written = {
            let _running = lock(&self.inner.background_mutex);
            self.inner.background_write()
        };
        let released = lock(&self.inner.cluster_info).dispose(&*self.inner.backend);
        let id = self.cluster_id().to_string();
        log_event(Event::StoreDisposed, &[("cluster_id", id.as_str())]);
        written.and(released)
    }
}

impl NodeStateComparator for DocumentNodeStore {
    fn compare(
        &self,
        after: &NodeState,
        before: &NodeState,
        diff: &mut dyn NodeStateDiff,
    ) -> StoreResult<bool> {
        self.inner.ensure_open()?;
        self.inner.compare(after, before, diff)
    }
}

impl Drop for DocumentNodeStore {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use crate::diff::JsopDiff;
    use crate::revision::VirtualClock;

    fn store() -> DocumentNodeStore {
        DocumentNodeStore::builder()
            .backend(Arc::new(MemoryDocumentStore::new()))
            .clock(Arc::new(VirtualClock::new(1_000_000)))
            .cluster_id(1)
            .async_delay(Duration::ZERO)
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_store_has_empty_root() {
        let ns = store();
        let root = ns.get_root().unwrap();
        assert!(root.path().is_root());
        assert!(root.properties().is_empty());
        assert!(ns.child_names(&root).unwrap().is_empty());
        assert!(ns.head().get(1).is_some());
    }

    #[test]
    fn test_merge_sets_and_removes_properties() {
        let ns = store();
        let mut builder = ns.get_root().unwrap().builder();
        builder.add_node("/a").unwrap();
        builder.set_property("/a", "p", 1).unwrap();
        builder.set_property("/", "q", "x").unwrap();
        let root = ns.merge(&builder).unwrap();
        assert_eq!(root.property("q"), Some(&PropertyValue::from("x")));
        let a = ns.get_child(&root, "a").unwrap().unwrap();
        assert_eq!(a.property("p"), Some(&PropertyValue::Long(1)));

        let mut builder = root.builder();
        builder.remove_property("/a", "p").unwrap();
        let root = ns.merge(&builder).unwrap();
        let a = ns.get_child(&root, "a").unwrap().unwrap();
        assert!(!a.has_property("p"));
        assert_eq!(ns.metrics().snapshot().commits, 2);
    }

    #[test]
    fn test_old_root_keeps_old_values() {
        let ns = store();
        let mut builder = ns.get_root().unwrap().builder();
        builder.set_property("/", "v", 1).unwrap();
        let first = ns.merge(&builder).unwrap();
        let mut builder = first.builder();
        builder.set_property("/", "v", 2).unwrap();
        let second = ns.merge(&builder).unwrap();

        let again = ns
            .get_node_at(&Path::root(), first.root_revision())
            .unwrap()
            .unwrap();
        assert_eq!(again.property("v"), Some(&PropertyValue::Long(1)));
        assert_eq!(second.property("v"), Some(&PropertyValue::Long(2)));
    }

    #[test]
    fn test_remove_node_removes_subtree() {
        let ns = store();
        let mut builder = ns.get_root().unwrap().builder();
        builder.add_node("/a/b/c").unwrap();
        let root = ns.merge(&builder).unwrap();
        assert!(ns.get_node("/a/b/c").unwrap().is_some());

        let mut builder = root.builder();
        builder.remove_node("/a").unwrap();
        let root = ns.merge(&builder).unwrap();
        assert!(ns.child_names(&root).unwrap().is_empty());
        assert!(ns.get_node("/a/b/c").unwrap().is_none());
    }

    #[test]
    fn test_stale_base_conflicts() {
        let ns = store();
        let base = ns.get_root().unwrap();
        let mut first = base.builder();
        first.set_property("/", "p", 1).unwrap();
        ns.merge(&first).unwrap();

        let mut second = base.builder();
        second.set_property("/", "p", 2).unwrap();
        let err = ns.merge(&second).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(ns.metrics().snapshot().conflicts, 1);
        let root = ns.get_root().unwrap();
        assert_eq!(root.property("p"), Some(&PropertyValue::Long(1)));
    }

    #[test]
    fn test_properties_on_missing_node_rejected() {
        let ns = store();
        let mut builder = ns.get_root().unwrap().builder();
        builder.set_property("/missing", "p", 1).unwrap();
        assert!(matches!(
            ns.merge(&builder),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_compare_reports_changes() {
        let ns = store();
        let before = ns.get_root().unwrap();
        let mut builder = before.builder();
        builder.add_node("/x").unwrap();
        builder.set_property("/", "p", true).unwrap();
        let after = ns.merge(&builder).unwrap();

        let mut diff = JsopDiff::new("", 0);
        assert!(ns.compare(&after, &before, &mut diff).unwrap());
        assert_eq!(diff.to_string(), "^\"p\":true\n+\"x\":{}");

        let mut same = JsopDiff::new("", 0);
        assert!(ns.compare(&after, &after, &mut same).unwrap());
        assert_eq!(same.to_string(), "");
    }

    #[test]
    fn test_document_cache_stays_bounded() {
        let ns = DocumentNodeStore::builder()
            .backend(Arc::new(MemoryDocumentStore::new()))
            .clock(Arc::new(VirtualClock::new(1_000_000)))
            .cluster_id(1)
            .async_delay(Duration::ZERO)
            .document_cache_size(50)
            .build()
            .unwrap();
        for i in 0..300 {
            let mut builder = ns.get_root().unwrap().builder();
            builder.add_node(&format!("/n{}", i)).unwrap();
            ns.merge(&builder).unwrap();
        }
        ns.run_background_operations().unwrap();
        let root = ns.get_root().unwrap();
        assert_eq!(ns.child_names(&root).unwrap().len(), 300);
        assert!(ns.inner.documents.len() <= 51);
        assert!(ns.inner.documents.get(ROOT_ID).is_some());
        assert!(ns.get_node("/n0").unwrap().is_some());
    }

    #[test]
    fn test_commit_marker_moved_by_root_split_read_once() {
        let ns = DocumentNodeStore::builder()
            .backend(Arc::new(MemoryDocumentStore::new()))
            .clock(Arc::new(VirtualClock::new(1_000_000)))
            .cluster_id(1)
            .async_delay(Duration::ZERO)
            .num_revs_threshold(5)
            .build()
            .unwrap();
        let mut builder = ns.get_root().unwrap().builder();
        builder.add_node("/a").unwrap();
        builder.add_node("/b").unwrap();
        ns.merge(&builder).unwrap();
        for i in 0..20 {
            let mut builder = ns.get_root().unwrap().builder();
            builder.set_property("/", "p", i as i64).unwrap();
            ns.merge(&builder).unwrap();
        }
        ns.run_background_operations().unwrap();
        assert!(ns.metrics().snapshot().splits >= 1);

        let reads = || ns.metrics().snapshot().previous_document_reads;
        let before = reads();
        assert!(ns.get_node("/a").unwrap().is_some());
        let after_first = reads();
        assert!(after_first > before);

        assert!(ns.get_node("/a").unwrap().is_some());
        assert!(ns.get_node("/a").unwrap().is_some());
        assert_eq!(reads(), after_first);
    }

    #[test]
    fn test_disposed_store_rejects_calls() {
        let ns = store();
        ns.dispose().unwrap();
        ns.dispose().unwrap();
        assert_eq!(ns.get_root().unwrap_err(), StoreError::Disposed);
        let builder = NodeBuilder::new(RevisionVector::default());
        assert_eq!(ns.merge(&builder).unwrap_err(), StoreError::Disposed);
    }
}
