//! Document split
//!
//! Moves old history of one member out of a main document into a new
//! previous document. Rules:
//! - Only committed revisions of the splitting member move
//! - The newest committed entry of every property (and `_deleted`) stays
//!   inline, as do all pending entries
//! - A commit marker or `_commitRoot` entry is removed from the main
//!   document only when no entry kept inline refers to its revision
//! - The previous document is created before the main document points
//!   to it

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::commit_value::{CommitValue, COMMITTED};
use super::node_document::{
    NodeDocument, Range, COMMIT_ROOT, PREVIOUS, REVISIONS, SPLIT_DOC_DEFAULT,
    SPLIT_DOC_MAX_REV_TIME, SPLIT_DOC_TYPE,
};
use super::path::previous_id_for;
use crate::backend::UpdateOp;
use crate::errors::StoreResult;
use crate::revision::Revision;

/// When a document is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitThresholds {
    /// Movable revisions of the splitting member.
    pub num_revs: usize,
    /// Movable commit markers held for changes to descendants only.
    pub children: usize,
}

/// The two updates performing one split.
#[derive(Debug, Clone)]
pub struct SplitOperations {
    /// Creates the previous document.
    pub previous: UpdateOp,
    /// Trims the main document and records the new range.
    pub main: UpdateOp,
    pub range: Range,
    /// Number of distinct revisions moved.
    pub moved_revisions: usize,
}

/// Computes the split of `doc` for `cluster_id`, or `None` if the
/// document stays below both thresholds. `is_committed` reports the
/// commit state of an inline entry.
pub fn split_operations<F>(
    doc: &NodeDocument,
    cluster_id: u32,
    thresholds: &SplitThresholds,
    mut is_committed: F,
) -> StoreResult<Option<SplitOperations>>
where
    F: FnMut(&Revision) -> StoreResult<bool>,
{
    let Some(path) = doc.path() else {
        return Ok(None);
    };
    if doc.is_previous_document() {
        return Ok(None);
    }

    let mut committed: BTreeMap<Revision, bool> = BTreeMap::new();
    let mut retained: BTreeSet<Revision> = BTreeSet::new();
    let mut moved_entries: Vec<(&str, Revision, Option<&String>)> = Vec::new();

    for (name, map) in doc.value_maps() {
        let mut newest_committed_kept = false;
        for (rev, value) in map.iter().rev() {
            let is_committed_rev = match committed.get(rev) {
                Some(known) => *known,
                None => {
                    let state = is_committed(rev)?;
                    committed.insert(*rev, state);
                    state
                }
            };
            if !newest_committed_kept {
                newest_committed_kept = is_committed_rev;
                retained.insert(*rev);
            } else if rev.cluster_id() == cluster_id && is_committed_rev {
                moved_entries.push((name, *rev, value.as_ref()));
            } else {
                retained.insert(*rev);
            }
        }
    }

    let changed = doc.changed_revisions();
    let mut moved_markers: Vec<(Revision, CommitValue)> = Vec::new();
    let mut child_markers = 0;
    for (rev, value) in doc.local_revisions() {
        if rev.cluster_id() != cluster_id || retained.contains(rev) {
            continue;
        }
        if !changed.contains_key(rev) {
            child_markers += 1;
        }
        moved_markers.push((*rev, *value));
    }

    let moved: BTreeSet<Revision> = moved_entries
        .iter()
        .map(|(_, rev, _)| *rev)
        .chain(moved_markers.iter().map(|(rev, _)| *rev))
        .collect();
    let (Some(low), Some(high)) = (moved.first().copied(), moved.last().copied()) else {
        return Ok(None);
    };
    if moved.len() < thresholds.num_revs && child_markers < thresholds.children {
        return Ok(None);
    }

    let range = Range::new(high, low, 0);
    let previous_id = previous_id_for(path, &high, 0);

    let mut previous = UpdateOp::new(previous_id, true);
    previous
        .set(SPLIT_DOC_TYPE, Value::from(SPLIT_DOC_DEFAULT))
        .set(SPLIT_DOC_MAX_REV_TIME, Value::from(high.timestamp() / 1000));
    let mut main = UpdateOp::new(doc.id(), false);

    for (name, rev, value) in &moved_entries {
        let stored = value.map_or(Value::Null, |v| Value::String(v.clone()));
        previous.set_map_entry(*name, rev.to_string(), stored);
        main.remove_map_entry(*name, rev.to_string());
    }
    for (rev, value) in &moved_markers {
        previous.set_map_entry(REVISIONS, rev.to_string(), Value::from(marker(rev, value)));
        main.remove_map_entry(REVISIONS, rev.to_string());
    }
    for rev in &moved {
        if let Some(depth) = doc.commit_root_depth(rev) {
            previous.set_map_entry(COMMIT_ROOT, rev.to_string(), Value::from(depth));
            if !retained.contains(rev) {
                main.remove_map_entry(COMMIT_ROOT, rev.to_string());
            }
        }
    }
    main.set_map_entry(PREVIOUS, high.to_string(), Value::from(range.to_value()));

    Ok(Some(SplitOperations {
        previous,
        main,
        range,
        moved_revisions: moved.len(),
    }))
}

fn marker(rev: &Revision, value: &CommitValue) -> String {
    match value.commit_revision() {
        Some(commit) if commit != rev.as_trunk() => format!("c-{}", commit),
        _ => COMMITTED.to_string(),
    }
}
