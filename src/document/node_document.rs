//! NodeDocument - versioned state of one node
//!
//! Field layout of a node document:
//! - `<name>`: property map, revision -> JSON encoded value (`null` = removed)
//! - `_deleted`: revision -> `"true"` | `"false"`
//! - `_revisions`: commit markers held by a commit root, revision -> `"c"`
//! - `_commitRoot`: revision -> depth of the commit root
//! - `_lastRev`: cluster id -> newest revision of the subtree published
//!   by that member
//! - `_prev`: high revision -> `"<low revision>/<height>"`
//! - `_sdType`, `_sdMaxRevTime`: present on previous documents only
//!
//! Names starting with `_` are reserved for these fields.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::commit_value::CommitValue;
use super::path::{path_from_id, previous_id_for, Path};
use crate::backend::{Document, UpdateOp};
use crate::errors::{StoreError, StoreResult};
use crate::revision::Revision;

pub const DELETED: &str = "_deleted";
pub const REVISIONS: &str = "_revisions";
pub const COMMIT_ROOT: &str = "_commitRoot";
pub const LAST_REV: &str = "_lastRev";
pub const PREVIOUS: &str = "_prev";
pub const SPLIT_DOC_TYPE: &str = "_sdType";
pub const SPLIT_DOC_MAX_REV_TIME: &str = "_sdMaxRevTime";

/// `_sdType` of a previous document holding a plain revision range.
pub const SPLIT_DOC_DEFAULT: &str = "default";

/// Revision entries of one map, oldest first in storage order.
/// `None` marks a removal.
pub type ValueMap = BTreeMap<Revision, Option<String>>;

/// Returns true if `name` is usable as a property name.
pub fn is_property_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('_')
}

/// Revision range held by one previous document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub high: Revision,
    pub low: Revision,
    pub height: u32,
}

impl Range {
    pub fn new(high: Revision, low: Revision, height: u32) -> Self {
        Self { high, low, height }
    }

    pub fn cluster_id(&self) -> u32 {
        self.high.cluster_id()
    }

    /// True if `revision` of the same member lies within `[low, high]`.
    pub fn includes(&self, revision: &Revision) -> bool {
        revision.cluster_id() == self.cluster_id()
            && !self.low.is_newer_than(revision)
            && !revision.is_newer_than(&self.high)
    }

    /// Stored form of the value in `_prev`.
    pub fn to_value(&self) -> String {
        format!("{}/{}", self.low, self.height)
    }

    fn parse(high: Revision, value: &str) -> Option<Self> {
        let (low, height) = value.split_once('/')?;
        Some(Self {
            high,
            low: low.parse().ok()?,
            height: height.parse().ok()?,
        })
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}/{}", self.low, self.high, self.height)
    }
}

/// Identifies a `_prev` set. Previous ranges are only ever added, so the
/// count together with the newest high revision changes whenever a
/// previous document is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PreviousFingerprint {
    pub count: usize,
    pub newest: Option<Revision>,
}

/// A parsed node document, main or previous.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDocument {
    document: Document,
    path: Option<Path>,
    properties: BTreeMap<String, ValueMap>,
    deleted: ValueMap,
    revisions: BTreeMap<Revision, CommitValue>,
    commit_root: BTreeMap<Revision, u32>,
    last_rev: BTreeMap<u32, Revision>,
    previous: BTreeMap<Revision, Range>,
    is_previous: bool,
}

impl NodeDocument {
    /// Parses a backend document. Malformed revision keys make the
    /// document unusable and surface as an invariant violation.
    pub fn from_document(document: Document) -> StoreResult<Self> {
        let id = document.id().to_string();

        let mut doc = NodeDocument {
            path: path_from_id(&id),
            is_previous: document.get(SPLIT_DOC_TYPE).is_some(),
            properties: BTreeMap::new(),
            deleted: BTreeMap::new(),
            revisions: BTreeMap::new(),
            commit_root: BTreeMap::new(),
            last_rev: BTreeMap::new(),
            previous: BTreeMap::new(),
            document: Document::default(),
        };

        for (field, value) in document.data() {
            let Some(map) = value.as_object() else {
                continue;
            };
            match field.as_str() {
                DELETED => {
                    doc.deleted = parse_value_map(map).map_err(|k| malformed(&id, field, &k))?;
                }
                REVISIONS => {
                    for (key, marker) in map {
                        let rev: Revision =
                            key.parse().map_err(|_| malformed(&id, field, key))?;
                        if let Some(value) = marker
                            .as_str()
                            .and_then(|m| CommitValue::parse_marker(rev, m))
                        {
                            doc.revisions.insert(rev, value);
                        }
                    }
                }
                COMMIT_ROOT => {
                    for (key, depth) in map {
                        let rev: Revision =
                            key.parse().map_err(|_| malformed(&id, field, key))?;
                        let depth = depth
                            .as_u64()
                            .or_else(|| depth.as_str().and_then(|s| s.parse().ok()))
                            .ok_or_else(|| malformed(&id, field, key))?;
                        doc.commit_root.insert(rev, depth as u32);
                    }
                }
                LAST_REV => {
                    for (key, rev) in map {
                        let cluster_id: u32 =
                            key.parse().map_err(|_| malformed(&id, field, key))?;
                        let rev = rev
                            .as_str()
                            .and_then(|s| s.parse::<Revision>().ok())
                            .ok_or_else(|| malformed(&id, field, key))?;
                        doc.last_rev.insert(cluster_id, rev);
                    }
                }
                PREVIOUS => {
                    for (key, range) in map {
                        let high: Revision =
                            key.parse().map_err(|_| malformed(&id, field, key))?;
                        let range = range
                            .as_str()
                            .and_then(|s| Range::parse(high, s))
                            .ok_or_else(|| malformed(&id, field, key))?;
                        doc.previous.insert(high, range);
                    }
                }
                name if is_property_name(name) => {
                    let values = parse_value_map(map).map_err(|k| malformed(&id, field, &k))?;
                    doc.properties.insert(name.to_string(), values);
                }
                _ => {}
            }
        }
        doc.document = document;
        Ok(doc)
    }

    /// Returns the document as it would be after applying `op`.
    pub fn apply(&self, op: &UpdateOp) -> StoreResult<NodeDocument> {
        let mut document = self.document.clone();
        op.apply_to(&mut document);
        NodeDocument::from_document(document)
    }

    pub fn id(&self) -> &str {
        self.document.id()
    }

    /// Path of a main document, `None` for previous documents.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn is_previous_document(&self) -> bool {
        self.is_previous
    }

    pub fn mod_count(&self) -> u64 {
        self.document.mod_count()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn property_names(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    /// Inline entries of a property, or of `_deleted`.
    pub fn local_map(&self, name: &str) -> Option<&ValueMap> {
        if name == DELETED {
            return Some(&self.deleted).filter(|m| !m.is_empty());
        }
        self.properties.get(name)
    }

    pub fn deleted_map(&self) -> &ValueMap {
        &self.deleted
    }

    /// Commit markers held inline.
    pub fn local_revisions(&self) -> &BTreeMap<Revision, CommitValue> {
        &self.revisions
    }

    pub fn commit_marker(&self, revision: &Revision) -> Option<CommitValue> {
        self.revisions.get(revision).copied()
    }

    pub fn commit_root_depth(&self, revision: &Revision) -> Option<u32> {
        self.commit_root.get(revision).copied()
    }

    pub fn commit_roots(&self) -> &BTreeMap<Revision, u32> {
        &self.commit_root
    }

    pub fn last_rev(&self) -> &BTreeMap<u32, Revision> {
        &self.last_rev
    }

    pub fn has_previous(&self) -> bool {
        !self.previous.is_empty()
    }

    /// Previous ranges, newest high revision first.
    pub fn previous_ranges(&self) -> impl Iterator<Item = &Range> {
        self.previous.values().rev()
    }

    pub fn previous_fingerprint(&self) -> PreviousFingerprint {
        PreviousFingerprint {
            count: self.previous.len(),
            newest: self.previous.keys().next_back().copied(),
        }
    }

    /// Id of the previous document holding `range`. `None` on previous
    /// documents, which do not chain further.
    pub fn previous_id(&self, range: &Range) -> Option<String> {
        self.path
            .as_ref()
            .map(|path| previous_id_for(path, &range.high, range.height))
    }

    /// Every revision with an inline property or `_deleted` entry.
    pub fn changed_revisions(&self) -> BTreeMap<Revision, usize> {
        let mut revisions = BTreeMap::new();
        for map in self.properties.values().chain(std::iter::once(&self.deleted)) {
            for rev in map.keys() {
                *revisions.entry(*rev).or_insert(0) += 1;
            }
        }
        revisions
    }

    /// Maps with property entries, `_deleted` included.
    pub(crate) fn value_maps(&self) -> impl Iterator<Item = (&str, &ValueMap)> {
        self.properties
            .iter()
            .map(|(name, map)| (name.as_str(), map))
            .chain(std::iter::once((DELETED, &self.deleted)))
            .filter(|(_, map)| !map.is_empty())
    }
}

fn malformed(id: &str, field: &str, key: &str) -> StoreError {
    StoreError::invariant_violation(id, format!("malformed entry {}.{}", field, key))
}

fn parse_value_map(map: &serde_json::Map<String, Value>) -> Result<ValueMap, String> {
    let mut values = BTreeMap::new();
    for (key, value) in map {
        let rev: Revision = key.parse().map_err(|_| key.clone())?;
        let value = match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        values.insert(rev, value);
    }
    Ok(values)
}
