//! The document-backed node store
//!
//! `DocumentNodeStore` ties the revision model, resolver, commit
//! protocol and background operations together behind a small API:
//! read a root, record changes in a `NodeBuilder`, merge, compare.

mod background;
mod builder;
mod cache;
mod commit;
mod config;
mod node_builder;
mod node_state;
mod node_store;
mod value;

pub use builder::DocumentNodeStoreBuilder;
pub use config::StoreConfig;
pub use node_builder::NodeBuilder;
pub use node_state::NodeState;
pub use node_store::DocumentNodeStore;
pub use value::{BlobSource, PropertyValue};
