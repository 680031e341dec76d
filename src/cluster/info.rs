//! Cluster membership leases
//!
//! One document per cluster id in the `clusterNodes` collection. A member
//! owns its id while its lease is live and renews it periodically. An
//! expired or released lease makes the id free again.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{Collection, Condition, Document, DocumentStore, Key, UpdateOp};
use crate::errors::{StoreError, StoreResult};
use crate::observability::{Event, Logger};
use crate::revision::Clock;

pub const LEASE_END: &str = "leaseEnd";
pub const STATE: &str = "state";
pub const INSTANCE_ID: &str = "instanceId";
pub const START_TIME: &str = "startTime";

/// Claims on a fresh id are retried this often when racing other members.
const MAX_CLAIM_ATTEMPTS: usize = 16;

/// Lifecycle state recorded in a cluster node document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterNodeState {
    Active,
    Inactive,
}

impl ClusterNodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterNodeState::Active => "ACTIVE",
            ClusterNodeState::Inactive => "NONE",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "ACTIVE" => ClusterNodeState::Active,
            _ => ClusterNodeState::Inactive,
        }
    }
}

impl fmt::Display for ClusterNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True if `doc` records a live lease at `now`.
pub(crate) fn has_live_lease(doc: &Document, now: u64) -> bool {
    let state = doc
        .get(STATE)
        .and_then(Value::as_str)
        .map(ClusterNodeState::parse)
        .unwrap_or(ClusterNodeState::Inactive);
    let lease_end = doc.get(LEASE_END).and_then(Value::as_u64).unwrap_or(0);
    state == ClusterNodeState::Active && lease_end > now
}

/// The cluster id lease held by this process.
#[derive(Debug, Clone)]
pub struct ClusterNodeInfo {
    cluster_id: u32,
    instance_id: Uuid,
    lease_end: u64,
    lease_duration: u64,
}

impl ClusterNodeInfo {
    /// Acquires a cluster id. A requested id must not have a live lease.
    /// Without a request the lowest free id is reused, else `max + 1` is
    /// allocated.
    pub fn acquire(
        backend: &dyn DocumentStore,
        clock: &dyn Clock,
        requested_id: Option<u32>,
        lease_duration: Duration,
    ) -> StoreResult<Self> {
        let lease_duration = lease_duration.as_millis() as u64;
        let mut info = ClusterNodeInfo {
            cluster_id: 0,
            instance_id: Uuid::new_v4(),
            lease_end: 0,
            lease_duration,
        };

        if let Some(id) = requested_id {
            if id == 0 {
                return Err(StoreError::invalid_argument("cluster id 0 is reserved"));
            }
            let existing = backend.find(Collection::ClusterNodes, &id.to_string())?;
            if let Some(doc) = &existing {
                if has_live_lease(doc, clock.now_millis()) {
                    return Err(StoreError::ClusterIdInUse(id));
                }
            }
            if !info.try_claim(backend, clock, id, existing.as_ref())? {
                return Err(StoreError::ClusterIdInUse(id));
            }
            return Ok(info);
        }

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let docs = backend.query(Collection::ClusterNodes, "0", ":", usize::MAX)?;
            let mut known: Vec<(u32, Document)> = docs
                .into_iter()
                .filter_map(|doc| doc.id().parse::<u32>().ok().map(|id| (id, doc)))
                .collect();
            known.sort_by_key(|(id, _)| *id);

            let now = clock.now_millis();
            for (id, doc) in &known {
                if !has_live_lease(doc, now) && info.try_claim(backend, clock, *id, Some(doc))? {
                    return Ok(info);
                }
            }
            let next = known.last().map_or(1, |(id, _)| id + 1);
            if info.try_claim(backend, clock, next, None)? {
                return Ok(info);
            }
        }
        Err(StoreError::invalid_argument(
            "no free cluster id after repeated attempts",
        ))
    }

    /// Conditional claim on the previously observed `leaseEnd`.
    fn try_claim(
        &mut self,
        backend: &dyn DocumentStore,
        clock: &dyn Clock,
        id: u32,
        existing: Option<&Document>,
    ) -> StoreResult<bool> {
        let lease_end = clock.now_millis() + self.lease_duration;
        let doc_id = id.to_string();
        let claimed = match existing {
            None => {
                let mut op = UpdateOp::new(doc_id.as_str(), true);
                self.claim_changes(&mut op, lease_end);
                backend.create(Collection::ClusterNodes, &[op])?
            }
            Some(doc) => {
                let mut op = UpdateOp::new(doc_id.as_str(), false);
                self.claim_changes(&mut op, lease_end);
                let condition = match doc.get(LEASE_END) {
                    Some(value) => Condition::Equals(value.clone()),
                    None => Condition::Exists(false),
                };
                op.condition(Key::field(LEASE_END), condition);
                backend.find_and_update(Collection::ClusterNodes, &op)?.is_some()
            }
        };
        if claimed {
            self.cluster_id = id;
            self.lease_end = lease_end;
            let id = id.to_string();
            let instance = self.instance_id.to_string();
            Logger::info(
                Event::LeaseAcquired.as_str(),
                &[("cluster_id", id.as_str()), ("instance_id", instance.as_str())],
            );
        }
        Ok(claimed)
    }

    fn claim_changes(&self, op: &mut UpdateOp, lease_end: u64) {
        op.set(LEASE_END, Value::from(lease_end))
            .set(STATE, Value::from(ClusterNodeState::Active.as_str()))
            .set(INSTANCE_ID, Value::from(self.instance_id.to_string()))
            .set(START_TIME, Value::from(Utc::now().to_rfc3339()));
    }

    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn lease_end(&self) -> u64 {
        self.lease_end
    }

    /// Extends the lease once less than half of it remains. Returns true
    /// if the lease was written. Fails if another process took the id.
    pub fn renew_lease(&mut self, backend: &dyn DocumentStore, clock: &dyn Clock) -> StoreResult<bool> {
        let now = clock.now_millis();
        if self.lease_end.saturating_sub(now) > self.lease_duration / 2 {
            return Ok(false);
        }
        let lease_end = now + self.lease_duration;
        let mut op = UpdateOp::new(self.cluster_id.to_string(), false);
        op.set(LEASE_END, Value::from(lease_end))
            .set(STATE, Value::from(ClusterNodeState::Active.as_str()))
            .condition(
                Key::field(INSTANCE_ID),
                Condition::Equals(Value::from(self.instance_id.to_string())),
            );
        let id = self.cluster_id.to_string();
        if backend.find_and_update(Collection::ClusterNodes, &op)?.is_none() {
            Logger::error(Event::LeaseRenewFailed.as_str(), &[("cluster_id", id.as_str())]);
            return Err(StoreError::ClusterIdInUse(self.cluster_id));
        }
        self.lease_end = lease_end;
        let lease = lease_end.to_string();
        Logger::trace(
            Event::LeaseRenewed.as_str(),
            &[("cluster_id", id.as_str()), ("lease_end", lease.as_str())],
        );
        Ok(true)
    }

    /// Releases the id: inactive with `leaseEnd = 0`.
    pub fn dispose(&mut self, backend: &dyn DocumentStore) -> StoreResult<()> {
        let mut op = UpdateOp::new(self.cluster_id.to_string(), false);
        op.set(LEASE_END, Value::from(0u64))
            .set(STATE, Value::from(ClusterNodeState::Inactive.as_str()))
            .condition(
                Key::field(INSTANCE_ID),
                Condition::Equals(Value::from(self.instance_id.to_string())),
            );
        backend.find_and_update(Collection::ClusterNodes, &op)?;
        self.lease_end = 0;
        let id = self.cluster_id.to_string();
        Logger::info(Event::LeaseReleased.as_str(), &[("cluster_id", id.as_str())]);
        Ok(())
    }
}
