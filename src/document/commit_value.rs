//! Commit state of a revision entry
//!
//! A revision entry written to a document is not visible by being present.
//! It becomes visible once the commit root holds a commit marker for it.

use std::fmt;

use crate::revision::Revision;

/// Value of a committed `_revisions` marker.
pub const COMMITTED: &str = "c";

/// Commit state of one revision entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitValue {
    /// Written in phase A, commit marker not (yet) present.
    Pending,
    /// Committed. `commit_revision` decides visibility.
    Committed { commit_revision: Revision },
}

impl CommitValue {
    pub fn committed(commit_revision: Revision) -> Self {
        CommitValue::Committed { commit_revision }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, CommitValue::Committed { .. })
    }

    pub fn commit_revision(&self) -> Option<Revision> {
        match self {
            CommitValue::Committed { commit_revision } => Some(*commit_revision),
            CommitValue::Pending => None,
        }
    }

    /// Parses a stored marker for `revision`: `c` or `c-<commit revision>`.
    /// Anything else is not a commit marker.
    pub fn parse_marker(revision: Revision, marker: &str) -> Option<Self> {
        if marker == COMMITTED {
            return Some(Self::committed(revision.as_trunk()));
        }
        let commit = marker.strip_prefix("c-")?;
        commit.parse::<Revision>().ok().map(Self::committed)
    }
}

impl fmt::Display for CommitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitValue::Pending => f.write_str("pending"),
            CommitValue::Committed { commit_revision } => write!(f, "committed({})", commit_revision),
        }
    }
}
