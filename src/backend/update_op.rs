//! UpdateOp - atomic, optionally conditional change of one document

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use super::document::{Document, MOD_COUNT};
use crate::revision::Revision;

/// Addresses a top-level field or one entry of a map field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    name: String,
    sub_key: Option<String>,
}

impl Key {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_key: None,
        }
    }

    pub fn entry(name: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_key: Some(sub_key.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sub_key(&self) -> Option<&str> {
        self.sub_key.as_deref()
    }

    fn lookup<'a>(&self, doc: &'a Document) -> Option<&'a Value> {
        match &self.sub_key {
            Some(sub) => doc.map_entry(&self.name, sub),
            None => doc.get(&self.name),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_key {
            Some(sub) => write!(f, "{}.{}", self.name, sub),
            None => f.write_str(&self.name),
        }
    }
}

/// A change applied to one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Overwrite the value.
    Set(Value),
    /// Set a revision value unless the stored revision of the same member
    /// is already newer.
    MaxRevision(Revision),
    /// Add to a numeric value (missing counts as zero).
    Increment(i64),
    /// Remove the field or map entry.
    Remove,
}

/// A precondition on one key, checked atomically with the update.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The key is present (`true`) or absent (`false`).
    Exists(bool),
    /// The key holds exactly this value.
    Equals(Value),
}

/// A set of changes and conditions for a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    id: String,
    is_new: bool,
    changes: BTreeMap<Key, Operation>,
    conditions: BTreeMap<Key, Condition>,
}

impl UpdateOp {
    /// `is_new` marks an op that may create the document.
    pub fn new(id: impl Into<String>, is_new: bool) -> Self {
        Self {
            id: id.into(),
            is_new,
            changes: BTreeMap::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn changes(&self) -> &BTreeMap<Key, Operation> {
        &self.changes
    }

    pub fn conditions(&self) -> &BTreeMap<Key, Condition> {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.changes.insert(Key::field(name), Operation::Set(value));
        self
    }

    pub fn unset(&mut self, name: impl Into<String>) -> &mut Self {
        self.changes.insert(Key::field(name), Operation::Remove);
        self
    }

    pub fn increment(&mut self, name: impl Into<String>, delta: i64) -> &mut Self {
        self.changes
            .insert(Key::field(name), Operation::Increment(delta));
        self
    }

    pub fn set_map_entry(
        &mut self,
        name: impl Into<String>,
        sub_key: impl Into<String>,
        value: Value,
    ) -> &mut Self {
        self.changes
            .insert(Key::entry(name, sub_key), Operation::Set(value));
        self
    }

    pub fn remove_map_entry(
        &mut self,
        name: impl Into<String>,
        sub_key: impl Into<String>,
    ) -> &mut Self {
        self.changes
            .insert(Key::entry(name, sub_key), Operation::Remove);
        self
    }

    pub fn max_revision_entry(
        &mut self,
        name: impl Into<String>,
        sub_key: impl Into<String>,
        revision: Revision,
    ) -> &mut Self {
        self.changes
            .insert(Key::entry(name, sub_key), Operation::MaxRevision(revision));
        self
    }

    pub fn condition(&mut self, key: Key, condition: Condition) -> &mut Self {
        self.conditions.insert(key, condition);
        self
    }

    /// Returns true if every condition holds on `doc` (`None` = missing).
    pub fn conditions_hold(&self, doc: Option<&Document>) -> bool {
        self.conditions.iter().all(|(key, condition)| {
            let current = doc.and_then(|d| key.lookup(d));
            match condition {
                Condition::Exists(expected) => current.is_some() == *expected,
                Condition::Equals(expected) => current == Some(expected),
            }
        })
    }

    /// Applies the changes to `doc` in place and bumps its modification
    /// count. Conditions are not checked here.
    pub fn apply_to(&self, doc: &mut Document) {
        let data = doc.data_mut();
        for (key, op) in &self.changes {
            match key.sub_key() {
                None => apply_field(data, key.name(), op),
                Some(sub) => {
                    let entry = data
                        .entry(key.name().to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    let now_empty = match entry {
                        Value::Object(map) => {
                            apply_field(map, sub, op);
                            map.is_empty()
                        }
                        _ => false,
                    };
                    if now_empty {
                        data.remove(key.name());
                    }
                }
            }
        }
        let count = data.get(MOD_COUNT).and_then(Value::as_u64).unwrap_or(0);
        data.insert(MOD_COUNT.to_string(), Value::from(count + 1));
    }

    /// Returns an op that removes every map entry this op sets. Used to
    /// roll back partially applied commits.
    pub fn reverse_map_entries(&self) -> UpdateOp {
        let mut reverse = UpdateOp::new(self.id.clone(), false);
        for (key, op) in &self.changes {
            if let (Some(sub), Operation::Set(_)) = (key.sub_key(), op) {
                reverse.remove_map_entry(key.name(), sub);
            }
        }
        reverse
    }
}

fn apply_field(map: &mut Map<String, Value>, name: &str, op: &Operation) {
    match op {
        Operation::Set(value) => {
            map.insert(name.to_string(), value.clone());
        }
        Operation::Remove => {
            map.remove(name);
        }
        Operation::Increment(delta) => {
            let current = map.get(name).and_then(Value::as_i64).unwrap_or(0);
            map.insert(name.to_string(), Value::from(current + delta));
        }
        Operation::MaxRevision(revision) => {
            let current = map
                .get(name)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Revision>().ok());
            let replace = match current {
                Some(existing) => revision.is_newer_than(&existing),
                None => true,
            };
            if replace {
                map.insert(name.to_string(), Value::String(revision.to_string()));
            }
        }
    }
}
