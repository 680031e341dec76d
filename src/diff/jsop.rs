//! JSOP rendering of diffs
//!
//! - `^"path":value` property added or changed, `^"path":null` removed
//! - `+"path":{}` child added
//! - `-"path"` child removed
//! - `^"path":{}` child changed, when not descending further

use std::fmt;

use super::{NodeStateComparator, NodeStateDiff};
use crate::errors::StoreError;
use crate::store::{NodeState, PropertyValue};

/// One change to the child names of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildChange {
    Added(String),
    Removed(String),
    Changed(String),
}

impl ChildChange {
    pub fn name(&self) -> &str {
        match self {
            ChildChange::Added(name) | ChildChange::Removed(name) | ChildChange::Changed(name) => {
                name
            }
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Renders child changes one per line.
pub fn render_child_changes(changes: &[ChildChange]) -> String {
    changes
        .iter()
        .map(|change| match change {
            ChildChange::Added(name) => format!("+{}:{{}}", quote(name)),
            ChildChange::Removed(name) => format!("-{}", quote(name)),
            ChildChange::Changed(name) => format!("^{}:{{}}", quote(name)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses the output of `render_child_changes`. `None` on malformed input.
pub fn parse_child_changes(jsop: &str) -> Option<Vec<ChildChange>> {
    let mut changes = Vec::new();
    for line in jsop.lines().filter(|line| !line.is_empty()) {
        let mut chars = line.chars();
        let op = chars.next()?;
        let rest = chars.as_str();
        let change = match op {
            '+' => ChildChange::Added(serde_json::from_str(rest.strip_suffix(":{}")?).ok()?),
            '^' => ChildChange::Changed(serde_json::from_str(rest.strip_suffix(":{}")?).ok()?),
            '-' => ChildChange::Removed(serde_json::from_str(rest).ok()?),
            _ => return None,
        };
        changes.push(change);
    }
    Some(changes)
}

/// Collects a diff as JSOP, descending `depth` levels into changed
/// children. Descending needs a comparator.
pub struct JsopDiff<'a> {
    comparator: Option<&'a dyn NodeStateComparator>,
    path: String,
    depth: usize,
    lines: Vec<String>,
    error: Option<StoreError>,
}

impl<'a> JsopDiff<'a> {
    pub fn new(path: impl Into<String>, depth: usize) -> Self {
        Self {
            comparator: None,
            path: path.into(),
            depth,
            lines: Vec::new(),
            error: None,
        }
    }

    pub fn with_comparator(
        comparator: &'a dyn NodeStateComparator,
        path: impl Into<String>,
        depth: usize,
    ) -> Self {
        Self {
            comparator: Some(comparator),
            ..Self::new(path, depth)
        }
    }

    /// First error raised while descending into a child.
    pub fn take_error(&mut self) -> Option<StoreError> {
        self.error.take()
    }

    fn concat(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        }
    }
}

impl fmt::Display for JsopDiff<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

impl fmt::Debug for JsopDiff<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsopDiff")
            .field("path", &self.path)
            .field("depth", &self.depth)
            .field("lines", &self.lines)
            .finish()
    }
}

impl NodeStateDiff for JsopDiff<'_> {
    fn property_added(&mut self, name: &str, after: &PropertyValue) -> bool {
        let line = format!("^{}:{}", quote(&self.concat(name)), after.to_jsop());
        self.lines.push(line);
        true
    }

    fn property_changed(&mut self, name: &str, _before: &PropertyValue, after: &PropertyValue) -> bool {
        self.property_added(name, after)
    }

    fn property_deleted(&mut self, name: &str, _before: &PropertyValue) -> bool {
        let line = format!("^{}:null", quote(&self.concat(name)));
        self.lines.push(line);
        true
    }

    fn child_node_added(&mut self, name: &str, _after: &NodeState) -> bool {
        let line = format!("+{}:{{}}", quote(&self.concat(name)));
        self.lines.push(line);
        true
    }

    fn child_node_changed(&mut self, name: &str, before: &NodeState, after: &NodeState) -> bool {
        let path = self.concat(name);
        match self.comparator {
            Some(comparator) if self.depth > 0 => {
                let mut child = JsopDiff::with_comparator(comparator, path, self.depth - 1);
                let result = comparator.compare(after, before, &mut child);
                self.lines.append(&mut child.lines);
                match result {
                    Ok(proceed) => match child.error.take() {
                        Some(error) => {
                            self.error = Some(error);
                            false
                        }
                        None => proceed,
                    },
                    Err(error) => {
                        self.error = Some(error);
                        false
                    }
                }
            }
            _ => {
                self.lines.push(format!("^{}:{{}}", quote(&path)));
                true
            }
        }
    }

    fn child_node_deleted(&mut self, name: &str, _before: &NodeState) -> bool {
        let line = format!("-{}", quote(&self.concat(name)));
        self.lines.push(line);
        true
    }
}
