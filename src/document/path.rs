//! Node paths and the document ids derived from them
//!
//! - A path is `/` or `/`-separated non-empty names
//! - Document id of a path: `<depth>:<path>`
//! - Previous document id: `<depth + 2>:p<path>/<high revision>/<height>`

use std::fmt;
use std::str::FromStr;

use crate::errors::{StoreError, StoreResult};
use crate::revision::Revision;

/// An absolute node path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(String);

impl Path {
    pub fn root() -> Self {
        Path("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of names in the path, 0 for the root.
    pub fn depth(&self) -> u32 {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count() as u32
        }
    }

    /// Last name, empty for the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            ""
        } else {
            self.0.rsplit('/').next().unwrap_or_default()
        }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Path::root()),
            Some(idx) => Some(Path(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends one name. The name must be non-empty and free of `/`.
    pub fn child(&self, name: &str) -> StoreResult<Path> {
        validate_name(name)?;
        if self.is_root() {
            Ok(Path(format!("/{}", name)))
        } else {
            Ok(Path(format!("{}/{}", self.0, name)))
        }
    }

    /// The ancestor at `depth` (0 = root). Returns self if `depth` is not
    /// smaller than the path's depth.
    pub fn ancestor_at_depth(&self, depth: u32) -> Path {
        let mut current = self.clone();
        while current.depth() > depth {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Deepest path that is an ancestor of or equal to both.
    pub fn common_ancestor(&self, other: &Path) -> Path {
        let mut candidate = self.clone();
        loop {
            if candidate == *other || candidate.is_ancestor_of(other) {
                return candidate;
            }
            match candidate.parent() {
                Some(parent) => candidate = parent,
                None => return Path::root(),
            }
        }
    }

    /// Root first, self last.
    pub fn ancestors_and_self(&self) -> Vec<Path> {
        let mut paths = vec![self.clone()];
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            paths.push(parent.clone());
            current = parent;
        }
        paths.reverse();
        paths
    }
}

fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(StoreError::invalid_argument(format!(
            "invalid node name '{}'",
            name
        )));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "/" {
            return Ok(Path::root());
        }
        if !s.starts_with('/') || s.ends_with('/') {
            return Err(StoreError::invalid_argument(format!("invalid path '{}'", s)));
        }
        for name in s[1..].split('/') {
            validate_name(name)?;
        }
        Ok(Path(s.to_string()))
    }
}

/// Document id of the node at `path`.
pub fn id_from_path(path: &Path) -> String {
    format!("{}:{}", path.depth(), path)
}

/// Path of a main document id. `None` for previous document ids.
pub fn path_from_id(id: &str) -> Option<Path> {
    let (_, path) = id.split_once(':')?;
    path.parse().ok()
}

/// Id of the previous document of `path` whose range ends at `high`.
pub fn previous_id_for(path: &Path, high: &Revision, height: u32) -> String {
    let prefix = if path.is_root() {
        String::new()
    } else {
        path.to_string()
    };
    format!("{}:p{}/{}/{}", path.depth() + 2, prefix, high, height)
}

/// Exclusive id bounds enclosing exactly the direct children of `path`.
pub fn children_id_range(path: &Path) -> (String, String) {
    let prefix = if path.is_root() {
        "/".to_string()
    } else {
        format!("{}/", path)
    };
    let depth = path.depth() + 1;
    let from = format!("{}:{}", depth, prefix);
    let mut to = from.clone();
    to.pop();
    to.push('0');
    (from, to)
}
