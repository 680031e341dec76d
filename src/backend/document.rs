//! Document - schemaless backend record
//!
//! A document is a JSON object. Top-level values are either scalars or
//! maps (JSON objects) whose keys are revisions or cluster ids. The node
//! store gives these fields meaning; the backend only stores them.

use serde_json::{Map, Value};

/// Name of the id field every document carries.
pub const ID: &str = "_id";
/// Incremented by every update.
pub const MOD_COUNT: &str = "_modCount";

/// A single backend record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    data: Map<String, Value>,
}

impl Document {
    /// Creates an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert(ID.to_string(), Value::String(id.into()));
        Self { data }
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn id(&self) -> &str {
        self.data.get(ID).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The map stored under `key`, if it is a map.
    pub fn map(&self, key: &str) -> Option<&Map<String, Value>> {
        self.data.get(key).and_then(Value::as_object)
    }

    /// A single entry of the map stored under `key`.
    pub fn map_entry(&self, key: &str, sub_key: &str) -> Option<&Value> {
        self.map(key).and_then(|m| m.get(sub_key))
    }

    pub fn mod_count(&self) -> u64 {
        self.data.get(MOD_COUNT).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }
}
