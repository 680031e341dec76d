//! revstore - revision visibility and concurrency control for a clustered,
//! document-backed, multi-version node store
//!
//! Cluster members share one document backend. Every change carries a
//! revision; each member reads through a revision vector and sees a change
//! only once it is committed and published.

pub mod backend;
pub mod cluster;
pub mod diff;
pub mod document;
pub mod errors;
pub mod lock;
pub mod locks;
pub mod observability;
pub mod resolver;
pub mod revision;
pub mod store;

pub use backend::{DocumentStore, MemoryDocumentStore};
pub use errors::{StoreError, StoreResult};
pub use lock::{ClusterNodeStoreLock, ClusteredLockToken};
pub use revision::{Revision, RevisionVector};
pub use store::{
    DocumentNodeStore, DocumentNodeStoreBuilder, NodeBuilder, NodeState, PropertyValue,
    StoreConfig,
};
