//! Backend document store interface
//!
//! The node store consumes its persistence layer only through the
//! `DocumentStore` trait: keyed lookup, ordered range query, atomic
//! per-document update with optional conditions, and removal.
//!
//! This module provides:
//! - `DocumentStore` - the backend contract
//! - `Collection` - the logical collections used by the node store
//! - `Document` / `UpdateOp` - records and atomic changes
//! - `MemoryDocumentStore` - the in-process implementation

mod document;
mod errors;
mod memory;
mod update_op;

use std::fmt;

pub use document::{Document, ID, MOD_COUNT};
pub use errors::{BackendError, BackendResult};
pub use memory::MemoryDocumentStore;
pub use update_op::{Condition, Key, Operation, UpdateOp};

/// Logical collections of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Node documents and their previous documents.
    Nodes,
    /// One document per cluster member id.
    ClusterNodes,
    /// Well-known coordination documents (cluster locks).
    Settings,
}

impl Collection {
    pub const COUNT: usize = 3;

    pub fn index(&self) -> usize {
        match self {
            Collection::Nodes => 0,
            Collection::ClusterNodes => 1,
            Collection::Settings => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::ClusterNodes => "clusterNodes",
            Collection::Settings => "settings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generic key/value document store shared by all cluster members.
///
/// Every method is a single backend round trip. Implementations must make
/// each single-document update atomic.
pub trait DocumentStore: Send + Sync {
    /// Looks up one document.
    fn find(&self, collection: Collection, id: &str) -> BackendResult<Option<Document>>;

    /// Documents with `from_id < id < to_id`, ordered by id, at most
    /// `limit`.
    fn query(
        &self,
        collection: Collection,
        from_id: &str,
        to_id: &str,
        limit: usize,
    ) -> BackendResult<Vec<Document>>;

    /// Creates all documents if none of them exists yet. Returns false and
    /// changes nothing if any id is taken.
    fn create(&self, collection: Collection, ops: &[UpdateOp]) -> BackendResult<bool>;

    /// Applies `op` unconditionally, creating the document if the op is
    /// marked new. Returns the document as it was before the update.
    fn create_or_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>>;

    /// Applies `op` if the document exists and all conditions hold.
    /// Returns the document before the update, or `None` if nothing was
    /// changed.
    fn find_and_update(
        &self,
        collection: Collection,
        op: &UpdateOp,
    ) -> BackendResult<Option<Document>>;

    /// Removes documents, returning how many existed.
    fn remove(&self, collection: Collection, ids: &[String]) -> BackendResult<usize>;
}
