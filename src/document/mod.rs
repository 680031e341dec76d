//! Node documents
//!
//! - `Path` and the document ids derived from it
//! - `NodeDocument`, the parsed form of a backend document
//! - `CommitValue`, the commit state of a revision entry
//! - Split of old history into previous documents

mod commit_value;
mod node_document;
mod path;
mod split;

pub use commit_value::{CommitValue, COMMITTED};
pub use node_document::{
    is_property_name, NodeDocument, PreviousFingerprint, Range, ValueMap, COMMIT_ROOT, DELETED,
    LAST_REV, PREVIOUS, REVISIONS, SPLIT_DOC_DEFAULT, SPLIT_DOC_MAX_REV_TIME, SPLIT_DOC_TYPE,
};
pub use path::{children_id_range, id_from_path, path_from_id, previous_id_for, Path};
pub use split::{split_operations, SplitOperations, SplitThresholds};
