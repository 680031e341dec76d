//! Revision model
//!
//! This module provides:
//! - `Revision` - causal timestamp of one change by one cluster member
//! - `RevisionVector` - per-member observation state of a reader
//! - `Clock` / `SystemClock` / `VirtualClock` - time sources
//! - `RevisionClock` - strictly increasing revision allocation per member

mod clock;
mod revision;
mod vector;

pub use clock::{Clock, RevisionClock, SystemClock, VirtualClock};
pub use revision::{Revision, RevisionParseError};
pub use vector::{RevisionVector, VectorOrdering};
