//! Revision resolver
//!
//! Reconstructs the value of a property as of a reader's revision vector.
//!
//! Resolution order:
//! 1. Inline entries, newest first: the first committed entry visible to
//!    the reader wins, unless a newer committed entry is invisible to it
//! 2. A property without any committed inline entry has no committed
//!    history at all (a split never moves the newest committed entry)
//! 3. The negative-result cache
//! 4. Previous documents, newest range first, one backend lookup each
//!
//! Commit revisions that took a lookup of another document to resolve
//! are remembered in a `CommitValueCache`.
//!
//! An entry found in a previous document always had its commit marker
//! resolved when it was moved. Failing to resolve it now is an invariant
//! violation and is never cached as an absence.

mod commit_value_cache;
mod no_prop_cache;

use std::sync::Arc;

use crate::document::{id_from_path, CommitValue, NodeDocument, Range, DELETED};
use crate::errors::{StoreError, StoreResult};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::revision::{Revision, RevisionVector};

pub use commit_value_cache::CommitValueCache;
pub use no_prop_cache::{newest_highs, visible_bounds, PrevNoPropCache, VisibleBounds};

/// Document access needed to resolve revisions.
pub trait RevisionContext {
    /// Looks up a main document. May be served from a cache.
    fn find_document(&self, id: &str) -> StoreResult<Option<Arc<NodeDocument>>>;

    /// Looks up a previous document. One backend round trip.
    fn find_previous_document(&self, id: &str) -> StoreResult<Option<NodeDocument>>;
}

/// The entry a property resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub revision: Revision,
    /// `None` if the property was removed at `revision`.
    pub value: Option<String>,
}

/// Resolves property values of node documents.
#[derive(Debug)]
pub struct RevisionResolver {
    no_prop_cache: Option<Arc<PrevNoPropCache>>,
    commit_values: CommitValueCache,
    metrics: Arc<MetricsRegistry>,
}

pub const DEFAULT_COMMIT_VALUE_CACHE_SIZE: usize = 10_000;

impl RevisionResolver {
    /// `no_prop_cache` of `None` disables negative-result caching.
    pub fn new(no_prop_cache: Option<Arc<PrevNoPropCache>>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            no_prop_cache,
            commit_values: CommitValueCache::new(DEFAULT_COMMIT_VALUE_CACHE_SIZE),
            metrics,
        }
    }

    pub fn with_commit_value_cache_size(mut self, capacity: usize) -> Self {
        self.commit_values = CommitValueCache::new(capacity);
        self
    }

    pub fn commit_value_cache(&self) -> &CommitValueCache {
        &self.commit_values
    }

    pub fn no_prop_cache(&self) -> Option<&PrevNoPropCache> {
        self.no_prop_cache.as_deref()
    }

    /// Value of `name` on `doc` as seen by `vector`, `None` if absent or
    /// removed.
    pub fn resolve_property(
        &self,
        ctx: &dyn RevisionContext,
        doc: &NodeDocument,
        name: &str,
        vector: &RevisionVector,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .resolve_entry(ctx, doc, name, vector)?
            .and_then(|entry| entry.value))
    }

    /// True if the node of `doc` exists for `vector`.
    pub fn node_exists(
        &self,
        ctx: &dyn RevisionContext,
        doc: &NodeDocument,
        vector: &RevisionVector,
    ) -> StoreResult<bool> {
        let deleted = self.resolve_property(ctx, doc, DELETED, vector)?;
        Ok(deleted.as_deref() == Some("false"))
    }

    /// The newest committed entry of `name` visible to `vector`.
    pub fn resolve_entry(
        &self,
        ctx: &dyn RevisionContext,
        doc: &NodeDocument,
        name: &str,
        vector: &RevisionVector,
    ) -> StoreResult<Option<ResolvedEntry>> {
        let Some(local) = doc.local_map(name) else {
            return Ok(None);
        };

        let mut has_committed = false;
        let mut newer_invisible = false;
        let mut candidate: Option<ResolvedEntry> = None;
        for (rev, value) in local.iter().rev() {
            let state = self.commit_value(ctx, doc, doc, rev)?;
            if let CommitValue::Committed { commit_revision } = state {
                has_committed = true;
                if vector.is_visible(&commit_revision) {
                    candidate = Some(ResolvedEntry {
                        revision: *rev,
                        value: value.clone(),
                    });
                    break;
                }
                newer_invisible = true;
            }
        }
        // The newest committed inline entry is newer than anything a
        // split moved away.
        if !has_committed || !doc.has_previous() || (candidate.is_some() && !newer_invisible) {
            return Ok(candidate);
        }

        let ranges: Vec<Range> = doc
            .previous_ranges()
            .filter(|range| range_may_be_visible(range, vector))
            .filter(|range| match &candidate {
                Some(found) => range.high > found.revision,
                None => true,
            })
            .copied()
            .collect();
        if ranges.is_empty() {
            return Ok(candidate);
        }

        let cache = match candidate {
            Some(_) => None,
            None => self.no_prop_cache.as_deref(),
        };
        if let Some(cache) = cache {
            if cache.is_absent(doc, name, vector) {
                self.metrics.increment_no_prop_cache_hits();
                return Ok(None);
            }
            self.metrics.increment_no_prop_cache_misses();
        }

        let mut complete = true;
        for range in &ranges {
            if let Some(found) = &candidate {
                if range.high < found.revision {
                    break;
                }
            }
            let Some(id) = doc.previous_id(range) else {
                continue;
            };
            let Some(previous) = self.find_previous(ctx, &id)? else {
                Logger::warn(
                    Event::PreviousDocumentScan.as_str(),
                    &[("id", doc.id()), ("missing", id.as_str())],
                );
                complete = false;
                continue;
            };
            if let Some(found) = self.newest_visible_in(ctx, doc, &previous, name, vector)? {
                let newer = match &candidate {
                    Some(current) => found.revision > current.revision,
                    None => true,
                };
                if newer {
                    candidate = Some(found);
                }
            }
        }

        if let Some(cache) = self.no_prop_cache.as_deref() {
            match &candidate {
                Some(_) => cache.invalidate(doc.id(), name),
                None if complete => cache.record_absent(doc, name, vector),
                None => {}
            }
        }
        Ok(candidate)
    }

    fn newest_visible_in(
        &self,
        ctx: &dyn RevisionContext,
        main: &NodeDocument,
        previous: &NodeDocument,
        name: &str,
        vector: &RevisionVector,
    ) -> StoreResult<Option<ResolvedEntry>> {
        let Some(entries) = previous.local_map(name) else {
            return Ok(None);
        };
        for (rev, value) in entries.iter().rev() {
            match self.commit_value(ctx, main, previous, rev)? {
                CommitValue::Committed { commit_revision } => {
                    if vector.is_visible(&commit_revision) {
                        return Ok(Some(ResolvedEntry {
                            revision: *rev,
                            value: value.clone(),
                        }));
                    }
                }
                CommitValue::Pending => {
                    let revision = rev.to_string();
                    Logger::fatal(
                        Event::InvariantViolation.as_str(),
                        &[
                            ("id", previous.id()),
                            ("property", name),
                            ("revision", revision.as_str()),
                        ],
                    );
                    return Err(StoreError::invariant_violation(
                        previous.id(),
                        format!("no commit marker for {} of '{}'", revision, name),
                    ));
                }
            }
        }
        Ok(None)
    }

    /// Commit state of the entry `rev` held by `holder`, which is `main`
    /// itself or one of its previous documents.
    pub fn commit_value(
        &self,
        ctx: &dyn RevisionContext,
        main: &NodeDocument,
        holder: &NodeDocument,
        rev: &Revision,
    ) -> StoreResult<CommitValue> {
        if let Some(value) = holder.commit_marker(rev).or_else(|| main.commit_marker(rev)) {
            return Ok(value);
        }
        if let Some(commit_revision) = self.commit_values.get(rev) {
            return Ok(CommitValue::committed(commit_revision));
        }
        let value = self.lookup_commit_value(ctx, main, holder, rev)?;
        if let CommitValue::Committed { commit_revision } = value {
            self.commit_values.insert(*rev, commit_revision);
        }
        Ok(value)
    }

    /// Commit state of `rev` from its commit root or the commit root's
    /// previous documents.
    fn lookup_commit_value(
        &self,
        ctx: &dyn RevisionContext,
        main: &NodeDocument,
        holder: &NodeDocument,
        rev: &Revision,
    ) -> StoreResult<CommitValue> {
        let Some(path) = main.path() else {
            return Ok(CommitValue::Pending);
        };

        let depth = holder
            .commit_root_depth(rev)
            .or_else(|| main.commit_root_depth(rev));
        let fetched;
        let commit_root: &NodeDocument = match depth {
            Some(depth) if depth < path.depth() => {
                let id = id_from_path(&path.ancestor_at_depth(depth));
                fetched = ctx.find_document(&id)?;
                match fetched.as_deref() {
                    Some(root) => {
                        if let Some(value) = root.commit_marker(rev) {
                            return Ok(value);
                        }
                        root
                    }
                    None => return Ok(CommitValue::Pending),
                }
            }
            _ => main,
        };

        for range in commit_root.previous_ranges().filter(|r| r.includes(rev)) {
            let Some(id) = commit_root.previous_id(range) else {
                continue;
            };
            if id == holder.id() {
                continue;
            }
            if let Some(previous) = self.find_previous(ctx, &id)? {
                if let Some(value) = previous.commit_marker(rev) {
                    return Ok(value);
                }
            }
        }
        Ok(CommitValue::Pending)
    }

    /// True if the inline entry `rev` of `doc` is committed.
    pub fn is_committed(
        &self,
        ctx: &dyn RevisionContext,
        doc: &NodeDocument,
        rev: &Revision,
    ) -> StoreResult<bool> {
        Ok(self.commit_value(ctx, doc, doc, rev)?.is_committed())
    }

    fn find_previous(
        &self,
        ctx: &dyn RevisionContext,
        id: &str,
    ) -> StoreResult<Option<NodeDocument>> {
        self.metrics.increment_previous_document_reads();
        ctx.find_previous_document(id)
    }
}

/// False if the reader has seen nothing of the range's member, or only
/// revisions older than the range.
fn range_may_be_visible(range: &Range, vector: &RevisionVector) -> bool {
    match vector.get(range.cluster_id()) {
        Some(seen) => !range.low.is_newer_than(&seen),
        None => false,
    }
}
