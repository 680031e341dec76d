//! Revision - causal timestamp of one change
//!
//! - `(timestamp, counter, cluster_id, branch)`
//! - Totally ordered within one cluster id
//! - Across cluster ids the derived order is a stable storage order only,
//!   causality is expressed with `RevisionVector`
//! - Immutable once created

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when a revision string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid revision '{input}': {reason}")]
pub struct RevisionParseError {
    input: String,
    reason: &'static str,
}

impl RevisionParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A revision created by one cluster member.
///
/// The string form is `r<timestamp>-<counter>-<cluster_id>` with all parts
/// in lowercase hex, prefixed `b` instead of `r` for branch revisions.
///
/// Field order matters: the derived `Ord` compares timestamp, then counter,
/// then cluster id, which is the order revisions are kept in inside a
/// document.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Revision {
    timestamp: u64,
    counter: u32,
    cluster_id: u32,
    branch: bool,
}

impl Revision {
    /// Creates a trunk revision.
    #[inline]
    pub fn new(timestamp: u64, counter: u32, cluster_id: u32) -> Self {
        Self {
            timestamp,
            counter,
            cluster_id,
            branch: false,
        }
    }

    /// Milliseconds since the epoch when the revision was created.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Disambiguates revisions created within the same millisecond.
    #[inline]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The cluster member that created this revision.
    #[inline]
    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    #[inline]
    pub fn is_branch(&self) -> bool {
        self.branch
    }

    /// The same revision marked as a branch revision.
    pub fn as_branch(&self) -> Self {
        Self {
            branch: true,
            ..*self
        }
    }

    /// The same revision without the branch marker.
    pub fn as_trunk(&self) -> Self {
        Self {
            branch: false,
            ..*self
        }
    }

    /// Returns true if `self` was created after `other` by the same member.
    ///
    /// Revisions of different cluster members are causally unrelated and
    /// never newer than each other.
    pub fn is_newer_than(&self, other: &Revision) -> bool {
        self.cluster_id == other.cluster_id
            && (self.timestamp, self.counter) > (other.timestamp, other.counter)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:x}-{:x}-{:x}",
            if self.branch { 'b' } else { 'r' },
            self.timestamp,
            self.counter,
            self.cluster_id
        )
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let branch = match s.chars().next() {
            Some('r') => false,
            Some('b') => true,
            _ => return Err(RevisionParseError::new(s, "must start with 'r' or 'b'")),
        };
        let mut parts = s[1..].split('-');
        let (Some(ts), Some(counter), Some(cluster), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RevisionParseError::new(s, "expected three '-' separated parts"));
        };
        let timestamp =
            u64::from_str_radix(ts, 16).map_err(|_| RevisionParseError::new(s, "bad timestamp"))?;
        let counter =
            u32::from_str_radix(counter, 16).map_err(|_| RevisionParseError::new(s, "bad counter"))?;
        let cluster_id = u32::from_str_radix(cluster, 16)
            .map_err(|_| RevisionParseError::new(s, "bad cluster id"))?;
        Ok(Self {
            timestamp,
            counter,
            cluster_id,
            branch,
        })
    }
}
