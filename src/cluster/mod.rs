//! Cluster membership
//!
//! - `ClusterNodeInfo` - the lease on this process's cluster id
//! - `ClusterView` - lease state of all members, refreshed by background
//!   reads and consulted by conflict detection

mod info;
mod view;

pub use info::{ClusterNodeInfo, ClusterNodeState, INSTANCE_ID, LEASE_END, START_TIME, STATE};
pub use view::{ClusterView, MemberLease};
