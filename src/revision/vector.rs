//! RevisionVector - what a reader has observed from each cluster member
//!
//! - Maps cluster id to the newest revision observed from that member
//! - Immutable: every mutation returns a new vector
//! - Compared component-wise, never by wall clock

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::revision::{Revision, RevisionParseError};

/// Result of comparing two revision vectors component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOrdering {
    /// Every component is equal.
    Equal,
    /// `self` has seen strictly less.
    Before,
    /// `self` has seen strictly more.
    After,
    /// Each side has seen something the other has not.
    Concurrent,
}

/// An immutable mapping `cluster_id -> Revision`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RevisionVector {
    revisions: BTreeMap<u32, Revision>,
}

impl RevisionVector {
    /// Builds a vector from revisions. For duplicate cluster ids the newest
    /// revision wins.
    pub fn new(revisions: impl IntoIterator<Item = Revision>) -> Self {
        revisions
            .into_iter()
            .fold(Self::default(), |vector, rev| vector.update(rev))
    }

    /// The revision observed from `cluster_id`, if any.
    pub fn get(&self, cluster_id: u32) -> Option<Revision> {
        self.revisions.get(&cluster_id).copied()
    }

    /// Returns a vector with `revision` as the entry of its cluster id,
    /// replacing an older entry. A revision older than the current entry
    /// leaves the vector unchanged.
    pub fn update(&self, revision: Revision) -> Self {
        let mut revisions = self.revisions.clone();
        match revisions.get(&revision.cluster_id()) {
            Some(current) if !revision.is_newer_than(current) => {}
            _ => {
                revisions.insert(revision.cluster_id(), revision.as_trunk());
            }
        }
        Self { revisions }
    }

    /// Component-wise maximum.
    pub fn pmax(&self, other: &RevisionVector) -> Self {
        other
            .revisions
            .values()
            .fold(self.clone(), |vector, rev| vector.update(*rev))
    }

    /// Returns true if `revision` is not covered by this vector, i.e. the
    /// vector has no entry for its cluster id or an older one.
    pub fn is_revision_newer(&self, revision: &Revision) -> bool {
        match self.revisions.get(&revision.cluster_id()) {
            Some(current) => revision.is_newer_than(current),
            None => true,
        }
    }

    /// Returns true if a change committed at `revision` is visible to a
    /// reader holding this vector.
    #[inline]
    pub fn is_visible(&self, revision: &Revision) -> bool {
        !self.is_revision_newer(revision)
    }

    /// Returns true if this vector has seen everything `other` has seen.
    pub fn dominates(&self, other: &RevisionVector) -> bool {
        matches!(self.compare(other), VectorOrdering::After | VectorOrdering::Equal)
    }

    /// Component-wise comparison. A missing component is older than any
    /// revision.
    pub fn compare(&self, other: &RevisionVector) -> VectorOrdering {
        let mut less = false;
        let mut greater = false;
        let clusters = self.revisions.keys().chain(other.revisions.keys());
        for cluster_id in clusters {
            match (self.get(*cluster_id), other.get(*cluster_id)) {
                (Some(a), Some(b)) => {
                    if a.is_newer_than(&b) {
                        greater = true;
                    } else if b.is_newer_than(&a) {
                        less = true;
                    }
                }
                (Some(_), None) => greater = true,
                (None, Some(_)) => less = true,
                (None, None) => {}
            }
        }
        match (less, greater) {
            (false, false) => VectorOrdering::Equal,
            (true, false) => VectorOrdering::Before,
            (false, true) => VectorOrdering::After,
            (true, true) => VectorOrdering::Concurrent,
        }
    }

    /// Iterates entries in cluster id order.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

impl fmt::Display for RevisionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rev) in self.revisions.values().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rev)?;
        }
        Ok(())
    }
}

impl FromStr for RevisionVector {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let revisions = s
            .split(',')
            .map(Revision::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(revisions))
    }
}
