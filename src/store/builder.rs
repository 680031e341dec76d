//! Construction of a `DocumentNodeStore`
//!
//! Startup order:
//! 1. Validate config
//! 2. Acquire a cluster id
//! 3. Create the root document if the backend has none
//! 4. Background read, which sets the head vector
//! 5. Start the background thread

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;

use super::background::BackgroundWorker;
use super::cache::DocumentCache;
use super::config::StoreConfig;
use super::node_store::{lock, DocumentNodeStore, StoreInner};
use crate::backend::{Collection, DocumentStore, MemoryDocumentStore, UpdateOp};
use crate::cluster::{ClusterNodeInfo, ClusterView};
use crate::diff::{DiffCache, MemoryDiffCache};
use crate::document::{COMMITTED, DELETED, LAST_REV, REVISIONS};
use crate::errors::StoreResult;
use crate::locks::ROOT_ID;
use crate::observability::{log_event, Event, Logger, MetricsRegistry};
use crate::resolver::{PrevNoPropCache, RevisionResolver};
use crate::revision::{Clock, RevisionClock, RevisionVector, SystemClock};

/// Builds a `DocumentNodeStore`. Without a backend the store runs on a
/// private `MemoryDocumentStore`.
#[derive(Default)]
pub struct DocumentNodeStoreBuilder {
    config: StoreConfig,
    backend: Option<Arc<dyn DocumentStore>>,
    clock: Option<Arc<dyn Clock>>,
    diff_cache: Option<Arc<dyn DiffCache>>,
}

impl std::fmt::Debug for DocumentNodeStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentNodeStoreBuilder")
            .field("config", &self.config)
            .field("backend", &self.backend.is_some())
            .finish_non_exhaustive()
    }
}

impl DocumentNodeStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole config. Setters called afterwards still apply.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn DocumentStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn diff_cache(mut self, diff_cache: Arc<dyn DiffCache>) -> Self {
        self.diff_cache = Some(diff_cache);
        self
    }

    pub fn cluster_id(mut self, cluster_id: u32) -> Self {
        self.config.cluster_id = Some(cluster_id);
        self
    }

    /// Period of the background thread. Zero disables it; background
    /// operations then only run on request.
    pub fn async_delay(mut self, delay: Duration) -> Self {
        self.config.async_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn num_revs_threshold(mut self, threshold: usize) -> Self {
        self.config.num_revs_threshold = threshold;
        self
    }

    pub fn children_threshold(mut self, threshold: usize) -> Self {
        self.config.children_threshold = threshold;
        self
    }

    pub fn document_cache_size(mut self, size: usize) -> Self {
        self.config.document_cache_size = size;
        self
    }

    pub fn prev_no_prop_cache(mut self, enabled: bool) -> Self {
        self.config.prev_no_prop_cache = enabled;
        self
    }

    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.config.lease_duration_ms = lease.as_millis() as u64;
        self
    }

    pub fn build(self) -> StoreResult<DocumentNodeStore> {
        self.config.validate()?;
        let requested = self
            .config
            .cluster_id
            .map_or_else(|| "auto".to_string(), |id| id.to_string());
        log_event(Event::StoreStart, &[("cluster_id", requested.as_str())]);

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let diff_cache = self
            .diff_cache
            .unwrap_or_else(|| Arc::new(MemoryDiffCache::new(self.config.diff_cache_size)));
        let config = self.config;

        let cluster_info = ClusterNodeInfo::acquire(
            &*backend,
            &*clock,
            config.cluster_id,
            Duration::from_millis(config.lease_duration_ms),
        )?;
        let cluster_id = cluster_info.cluster_id();
        let metrics = Arc::new(MetricsRegistry::new());
        let no_prop_cache = config
            .prev_no_prop_cache
            .then(|| Arc::new(PrevNoPropCache::new(config.prev_no_prop_cache_size)));

        let inner = Arc::new(StoreInner {
            revision_clock: RevisionClock::new(cluster_id, Arc::clone(&clock)),
            documents: DocumentCache::new(config.lock_stripes, config.document_cache_size),
            resolver: RevisionResolver::new(no_prop_cache, Arc::clone(&metrics))
                .with_commit_value_cache_size(config.commit_value_cache_size),
            config,
            backend,
            clock,
            cluster_info: Mutex::new(cluster_info),
            cluster_view: RwLock::new(ClusterView::default()),
            head: RwLock::new(RevisionVector::default()),
            root_state: Mutex::new(None),
            diff_cache,
            metrics,
            commit_lock: Mutex::new(()),
            background_op_lock: RwLock::new(()),
            background_mutex: Mutex::new(()),
            unsaved_last_revs: Mutex::new(BTreeMap::new()),
            split_candidates: Mutex::new(BTreeSet::new()),
            disposed: AtomicBool::new(false),
        });

        match start(&inner) {
            Ok(worker) => {
                let id = cluster_id.to_string();
                let head = inner.head().to_string();
                log_event(
                    Event::StoreReady,
                    &[("cluster_id", id.as_str()), ("head", head.as_str())],
                );
                Ok(DocumentNodeStore::from_parts(inner, worker))
            }
            Err(err) => {
                // the lease would otherwise block this id until it expires
                if let Err(release) = lock(&inner.cluster_info).dispose(&*inner.backend) {
                    Logger::error(
                        Event::LeaseReleased.as_str(),
                        &[("error", &release.to_string())],
                    );
                }
                Err(err)
            }
        }
    }
}

fn start(inner: &Arc<StoreInner>) -> StoreResult<Option<BackgroundWorker>> {
    initialize_root(inner)?;
    inner.background_read()?;
    inner
        .config
        .async_delay()
        .map(|delay| BackgroundWorker::spawn(Arc::downgrade(inner), delay))
        .transpose()
}

/// Creates the root document in one committed revision, published right
/// away. Loses quietly to a concurrent creator.
fn initialize_root(inner: &StoreInner) -> StoreResult<()> {
    inner.metrics.increment_backend_finds();
    let existing = inner.with_retry("find", || inner.backend.find(Collection::Nodes, ROOT_ID))?;
    if existing.is_some() {
        return Ok(());
    }
    let revision = inner.revision_clock.new_revision();
    let rev = revision.to_string();
    let mut op = UpdateOp::new(ROOT_ID, true);
    op.set_map_entry(DELETED, rev.as_str(), Value::from("false"))
        .set_map_entry(REVISIONS, rev.as_str(), Value::from(COMMITTED))
        .max_revision_entry(LAST_REV, revision.cluster_id().to_string(), revision);
    inner.with_retry("create", || {
        inner.backend.create(Collection::Nodes, std::slice::from_ref(&op))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use crate::errors::StoreError;
    use crate::revision::VirtualClock;

    #[test]
    fn test_build_creates_root_once() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let first = DocumentNodeStore::builder()
            .backend(backend.clone())
            .clock(clock.clone())
            .async_delay(Duration::ZERO)
            .build()
            .unwrap();
        let second = DocumentNodeStore::builder()
            .backend(backend.clone())
            .clock(clock)
            .async_delay(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(first.cluster_id(), 1);
        assert_eq!(second.cluster_id(), 2);
        assert_eq!(backend.count(Collection::Nodes), 1);
        assert!(second.get_root().unwrap().properties().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = DocumentNodeStore::builder()
            .cluster_id(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_background_thread_publishes_changes() {
        let backend = Arc::new(MemoryDocumentStore::new());
        let ns = DocumentNodeStore::builder()
            .backend(backend.clone())
            .cluster_id(1)
            .async_delay(Duration::from_millis(5))
            .build()
            .unwrap();
        let mut builder = ns.get_root().unwrap().builder();
        builder.set_property("/", "p", 1).unwrap();
        ns.merge(&builder).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while ns.metrics().snapshot().background_writes == 0 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        ns.dispose().unwrap();
        let root = backend.find(Collection::Nodes, ROOT_ID).unwrap().unwrap();
        assert!(root.map_entry(LAST_REV, "1").is_some());
    }
}
