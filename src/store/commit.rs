//! Two-phase commit
//!
//! A commit writes one update per touched document. The commit root is
//! the deepest common ancestor of all touched paths.
//!
//! Phase A writes every change, `_commitRoot` entries on documents other
//! than the commit root, and the commit root's own changes last. Phase B
//! writes the commit marker on the commit root, which makes everything
//! visible at once. A single-document commit is one atomic update.
//!
//! Each update returns the document as it was before. A touched key with
//! a concurrent change is a conflict: every update applied so far is
//! rolled back and the conflict is returned.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::PoisonError;

use serde_json::Value;

use super::node_store::StoreInner;
use crate::backend::{Collection, UpdateOp};
use crate::document::{
    id_from_path, CommitValue, NodeDocument, Path, COMMITTED, COMMIT_ROOT, DELETED, REVISIONS,
};
use crate::errors::{StoreError, StoreResult};
use crate::observability::{Event, Logger};
use crate::revision::{Revision, RevisionVector};

#[derive(Debug)]
struct DocumentChanges {
    op: UpdateOp,
    keys: BTreeSet<String>,
}

/// Updates of one commit, applied in order. `marker` is the phase B
/// update, absent for a single-document commit.
#[derive(Debug)]
struct CommitPlan<'a> {
    changes: Vec<(&'a Path, &'a BTreeSet<String>, UpdateOp)>,
    marker: Option<UpdateOp>,
}

/// The document changes of one merge.
#[derive(Debug)]
pub(crate) struct Commit {
    revision: Revision,
    base: RevisionVector,
    documents: BTreeMap<Path, DocumentChanges>,
}

impl Commit {
    pub(crate) fn new(revision: Revision, base: RevisionVector) -> Self {
        Self {
            revision,
            base,
            documents: BTreeMap::new(),
        }
    }

    pub(crate) fn revision(&self) -> Revision {
        self.revision
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn changes(&mut self, path: &Path) -> &mut DocumentChanges {
        self.documents
            .entry(path.clone())
            .or_insert_with(|| DocumentChanges {
                op: UpdateOp::new(id_from_path(path), true),
                keys: BTreeSet::new(),
            })
    }

    /// Records a property value, `None` for a removal. `value` is the
    /// encoded form.
    pub(crate) fn update_property(&mut self, path: &Path, name: &str, value: Option<String>) {
        let rev = self.revision.to_string();
        let changes = self.changes(path);
        changes
            .op
            .set_map_entry(name, rev, value.map_or(Value::Null, Value::String));
        changes.keys.insert(name.to_string());
    }

    pub(crate) fn set_deleted(&mut self, path: &Path, deleted: bool) {
        let rev = self.revision.to_string();
        let changes = self.changes(path);
        changes
            .op
            .set_map_entry(DELETED, rev, Value::from(deleted.to_string()));
        changes.keys.insert(DELETED.to_string());
    }

    /// Paths of all documents written by this commit.
    pub(crate) fn paths(&self) -> impl Iterator<Item = &Path> {
        self.documents.keys()
    }

    pub(crate) fn commit_root(&self) -> Option<Path> {
        let mut paths = self.documents.keys();
        let first = paths.next()?.clone();
        Some(paths.fold(first, |root, path| root.common_ancestor(path)))
    }

    fn plan(&self) -> Option<(Path, CommitPlan<'_>)> {
        let commit_root = self.commit_root()?;
        let rev = self.revision.to_string();
        let mut changes = Vec::with_capacity(self.documents.len());
        let mut root_changes = None;

        for (path, document) in &self.documents {
            let mut op = document.op.clone();
            if *path == commit_root {
                root_changes = Some((path, &document.keys, op));
                continue;
            }
            op.set_map_entry(COMMIT_ROOT, rev.as_str(), Value::from(commit_root.depth()));
            changes.push((path, &document.keys, op));
        }

        let marker = match root_changes {
            Some((path, keys, mut op)) if changes.is_empty() => {
                op.set_map_entry(REVISIONS, rev.as_str(), Value::from(COMMITTED));
                changes.push((path, keys, op));
                None
            }
            Some(root) => {
                changes.push(root);
                Some(marker_op(&commit_root, &rev))
            }
            None => Some(marker_op(&commit_root, &rev)),
        };
        Some((commit_root, CommitPlan { changes, marker }))
    }

    /// Writes the commit. On failure nothing of it stays visible.
    pub(crate) fn apply(&self, inner: &StoreInner) -> StoreResult<()> {
        let Some((commit_root, plan)) = self.plan() else {
            return Ok(());
        };
        let mut applied: Vec<&UpdateOp> = Vec::with_capacity(plan.changes.len());
        let result = self.apply_plan(inner, &plan, &mut applied);
        if let Err(err) = &result {
            if err.is_conflict() {
                inner.metrics.increment_conflicts();
                Logger::warn(
                    Event::MergeConflict.as_str(),
                    &[("commit_root", commit_root.as_str()), ("error", &err.to_string())],
                );
            }
            self.rollback(inner, &applied);
        }
        result
    }

    fn apply_plan<'p>(
        &self,
        inner: &StoreInner,
        plan: &'p CommitPlan<'_>,
        applied: &mut Vec<&'p UpdateOp>,
    ) -> StoreResult<()> {
        for (path, keys, op) in &plan.changes {
            let before = inner.with_retry("create_or_update", || {
                inner.backend.create_or_update(Collection::Nodes, op)
            })?;
            applied.push(op);
            inner.documents.apply_update(before.as_ref(), op)?;
            let Some(before) = before else {
                continue;
            };
            let before = NodeDocument::from_document(before)?;
            if let Some(conflicting) = self.find_conflict(inner, &before, keys)? {
                return Err(StoreError::conflict(path.as_str(), self.revision, conflicting));
            }
        }
        if let Some(marker) = &plan.marker {
            let before = inner.with_retry("create_or_update", || {
                inner.backend.create_or_update(Collection::Nodes, marker)
            })?;
            inner.documents.apply_update(before.as_ref(), marker)?;
        }
        Ok(())
    }

    /// A change to one of `keys` that the base did not see, committed or
    /// pending by another live member.
    fn find_conflict(
        &self,
        inner: &StoreInner,
        before: &NodeDocument,
        keys: &BTreeSet<String>,
    ) -> StoreResult<Option<Revision>> {
        let now = inner.clock.now_millis();
        let own = self.revision.cluster_id();
        let view = inner
            .cluster_view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for key in keys {
            let Some(entries) = before.local_map(key) else {
                continue;
            };
            for rev in entries.keys().rev() {
                if *rev == self.revision || self.base.is_visible(rev) {
                    continue;
                }
                match inner.resolver.commit_value(inner, before, before, rev)? {
                    CommitValue::Committed { commit_revision } => {
                        if !self.base.is_visible(&commit_revision) {
                            return Ok(Some(*rev));
                        }
                    }
                    CommitValue::Pending => {
                        if rev.cluster_id() != own && view.is_active(rev.cluster_id(), now) {
                            return Ok(Some(*rev));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    fn rollback(&self, inner: &StoreInner, applied: &[&UpdateOp]) {
        let revision = self.revision.to_string();
        for op in applied.iter().rev() {
            let reverse = op.reverse_map_entries();
            let result = inner
                .with_retry("rollback", || {
                    inner.backend.create_or_update(Collection::Nodes, &reverse)
                })
                .and_then(|before| inner.documents.apply_update(before.as_ref(), &reverse));
            match result {
                Ok(_) => Logger::info(
                    Event::MergeRollback.as_str(),
                    &[("id", op.id()), ("revision", revision.as_str())],
                ),
                Err(err) => Logger::error(
                    Event::MergeRollback.as_str(),
                    &[
                        ("id", op.id()),
                        ("revision", revision.as_str()),
                        ("error", &err.to_string()),
                    ],
                ),
            }
        }
    }
}

fn marker_op(commit_root: &Path, rev: &str) -> UpdateOp {
    let mut op = UpdateOp::new(id_from_path(commit_root), false);
    op.set_map_entry(REVISIONS, rev, Value::from(COMMITTED));
    op
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn commit() -> Commit {
        Commit::new(Revision::new(10, 0, 1), RevisionVector::default())
    }

    #[test]
    fn test_single_document_commit_carries_marker() {
        let mut c = commit();
        c.update_property(&p("/a"), "p", Some("{\"Long\":1}".to_string()));
        let (root, plan) = c.plan().unwrap();
        assert_eq!(root, p("/a"));
        assert_eq!(plan.changes.len(), 1);
        assert!(plan.marker.is_none());
        let op = &plan.changes[0].2;
        assert_eq!(op.id(), "1:/a");
        assert!(op
            .changes()
            .keys()
            .any(|k| k.name() == REVISIONS && k.sub_key() == Some("ra-0-1")));
    }

    #[test]
    fn test_commit_root_written_last_then_marker() {
        let mut c = commit();
        c.update_property(&Path::root(), "rootprop", Some("{\"String\":\"v\"}".to_string()));
        c.update_property(&p("/a1"), "nonrootprop", Some("{\"String\":\"v\"}".to_string()));
        let (root, plan) = c.plan().unwrap();
        assert!(root.is_root());
        let ids: Vec<&str> = plan.changes.iter().map(|(_, _, op)| op.id()).collect();
        assert_eq!(ids, vec!["1:/a1", "0:/"]);
        assert!(plan.changes[0]
            .2
            .changes()
            .keys()
            .any(|k| k.name() == COMMIT_ROOT));
        assert_eq!(plan.marker.as_ref().map(|op| op.id()), Some("0:/"));
    }

    #[test]
    fn test_untouched_commit_root_gets_marker_only() {
        let mut c = commit();
        c.set_deleted(&p("/a/x"), false);
        c.set_deleted(&p("/a/y"), false);
        assert_eq!(c.commit_root(), Some(p("/a")));
        let (_, plan) = c.plan().unwrap();
        assert_eq!(plan.changes.len(), 2);
        let marker = plan.marker.unwrap();
        assert_eq!(marker.id(), "1:/a");
        assert!(!marker.is_new());
    }

    #[test]
    fn test_empty_commit_has_no_plan() {
        assert!(commit().plan().is_none());
        assert!(commit().is_empty());
    }
}
