//! Snapshot of the cluster membership leases

use std::collections::BTreeMap;

use serde_json::Value;

use super::info::{ClusterNodeState, LEASE_END, STATE};
use crate::backend::{Collection, DocumentStore};
use crate::errors::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberLease {
    pub state: ClusterNodeState,
    pub lease_end: u64,
}

/// Lease state of every known member, as of the last refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    members: BTreeMap<u32, MemberLease>,
}

impl ClusterView {
    pub fn read(backend: &dyn DocumentStore) -> StoreResult<Self> {
        let mut members = BTreeMap::new();
        for doc in backend.query(Collection::ClusterNodes, "0", ":", usize::MAX)? {
            let Ok(id) = doc.id().parse::<u32>() else {
                continue;
            };
            let state = doc
                .get(STATE)
                .and_then(Value::as_str)
                .map_or(ClusterNodeState::Inactive, ClusterNodeState::parse);
            let lease_end = doc.get(LEASE_END).and_then(Value::as_u64).unwrap_or(0);
            members.insert(id, MemberLease { state, lease_end });
        }
        Ok(Self { members })
    }

    pub fn member(&self, cluster_id: u32) -> Option<&MemberLease> {
        self.members.get(&cluster_id)
    }

    /// True unless the member is known to be inactive or expired at
    /// `now`. A member not seen yet may have joined since the refresh
    /// and counts as active.
    pub fn is_active(&self, cluster_id: u32, now: u64) -> bool {
        match self.members.get(&cluster_id) {
            Some(lease) => lease.state == ClusterNodeState::Active && lease.lease_end > now,
            None => true,
        }
    }

    pub fn active_ids(&self, now: u64) -> Vec<u32> {
        self.members
            .keys()
            .copied()
            .filter(|id| self.is_active(*id, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryDocumentStore;
    use crate::cluster::ClusterNodeInfo;
    use crate::revision::{Clock, VirtualClock};
    use std::time::Duration;

    #[test]
    fn test_view_tracks_leases() {
        let store = MemoryDocumentStore::new();
        let clock = VirtualClock::new(10_000);
        let lease = Duration::from_secs(10);
        let mut one = ClusterNodeInfo::acquire(&store, &clock, Some(1), lease).unwrap();
        ClusterNodeInfo::acquire(&store, &clock, Some(2), lease).unwrap();
        one.dispose(&store).unwrap();

        let view = ClusterView::read(&store).unwrap();
        let now = clock.now_millis();
        assert!(!view.is_active(1, now));
        assert!(view.is_active(2, now));
        assert!(view.is_active(7, now));
        assert_eq!(view.active_ids(now), vec![2]);
        assert!(!view.is_active(2, now + 10_001));
    }
}
