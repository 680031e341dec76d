//! Cluster-wide named locks
//!
//! Every lock is one field `<name>-lease` of the `clusterLocks` settings
//! document holding `{token, clusterId, leaseEnd}`. Taking a lock is a
//! conditional update against the value last read, so at most one member
//! wins. An expired lease is free to take.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{Collection, Condition, DocumentStore, Key, UpdateOp};
use crate::errors::{StoreError, StoreResult};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::revision::Clock;

/// Id of the settings document holding all cluster locks.
pub const CLUSTER_LOCKS_ID: &str = "clusterLocks";

const DEFAULT_LEASE: Duration = Duration::from_secs(60);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Backoff between attempts of `lock`, in microseconds.
const MIN_BACKOFF_MICROS: u64 = 50;
const MAX_BACKOFF_MICROS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Lease {
    token: String,
    cluster_id: u32,
    lease_end: u64,
}

/// Proof of holding a cluster lock. Only the holder of the token can
/// release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteredLockToken {
    name: String,
    token: Uuid,
}

impl ClusteredLockToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> Uuid {
        self.token
    }
}

/// Lease-based named lock shared by every member using the same backend.
pub struct ClusterNodeStoreLock {
    backend: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    cluster_id: u32,
    lease: Duration,
    acquire_timeout: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl std::fmt::Debug for ClusterNodeStoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNodeStoreLock")
            .field("cluster_id", &self.cluster_id)
            .field("lease", &self.lease)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl ClusterNodeStoreLock {
    pub fn new(backend: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, cluster_id: u32) -> Self {
        Self {
            backend,
            clock,
            cluster_id,
            lease: DEFAULT_LEASE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// How long `lock` retries before failing with `LockTimeout`. Measured
    /// in wall time, independent of the lease clock.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Blocks until `name` is held or the acquire timeout elapses.
    pub fn lock(&self, name: &str) -> StoreResult<ClusteredLockToken> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut rng = rand::thread_rng();
        loop {
            if let Some(token) = self.try_lock(name)? {
                return Ok(token);
            }
            if let Some(metrics) = &self.metrics {
                metrics.increment_lock_contentions();
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(name.to_string()));
            }
            let backoff = rng.gen_range(MIN_BACKOFF_MICROS..=MAX_BACKOFF_MICROS);
            thread::sleep(Duration::from_micros(backoff));
        }
    }

    /// Takes `name` if it is free or its lease expired.
    pub fn try_lock(&self, name: &str) -> StoreResult<Option<ClusteredLockToken>> {
        self.ensure_document()?;
        let field = lease_field(name);
        let now = self.clock.now_millis();
        let current = self.current_value(&field)?;
        if let Some(lease) = current.as_ref().and_then(parse_lease) {
            if lease.lease_end > now {
                return Ok(None);
            }
        }

        let token = Uuid::new_v4();
        let lease = Lease {
            token: token.to_string(),
            cluster_id: self.cluster_id,
            lease_end: now + self.lease.as_millis() as u64,
        };
        let value = serde_json::to_value(&lease).map_err(|e| {
            StoreError::invalid_argument(format!("failed to encode lease of '{}': {}", name, e))
        })?;
        let condition = match current {
            Some(old) => Condition::Equals(old),
            None => Condition::Exists(false),
        };
        let mut op = UpdateOp::new(CLUSTER_LOCKS_ID, false);
        op.set(field.as_str(), value)
            .condition(Key::field(field.as_str()), condition);
        if self
            .backend
            .find_and_update(Collection::Settings, &op)?
            .is_none()
        {
            return Ok(None);
        }

        if let Some(metrics) = &self.metrics {
            metrics.increment_lock_acquisitions();
        }
        let cluster_id = self.cluster_id.to_string();
        let token_str = token.to_string();
        Logger::trace(
            Event::LockAcquired.as_str(),
            &[
                ("name", name),
                ("cluster_id", cluster_id.as_str()),
                ("token", token_str.as_str()),
            ],
        );
        Ok(Some(ClusteredLockToken {
            name: name.to_string(),
            token,
        }))
    }

    /// Releases the lock if `token` still holds it. Returns false for a
    /// stale token, for example after the lease expired and another
    /// member took the lock.
    pub fn unlock(&self, token: &ClusteredLockToken) -> StoreResult<bool> {
        let field = lease_field(&token.name);
        let token_str = token.token.to_string();
        let current = self.current_value(&field)?;
        let held = current
            .as_ref()
            .and_then(parse_lease)
            .is_some_and(|lease| lease.token == token_str);

        let released = match current {
            Some(old) if held => {
                let mut op = UpdateOp::new(CLUSTER_LOCKS_ID, false);
                op.unset(field.as_str())
                    .condition(Key::field(field.as_str()), Condition::Equals(old));
                self.backend
                    .find_and_update(Collection::Settings, &op)?
                    .is_some()
            }
            _ => false,
        };

        if released {
            Logger::trace(
                Event::LockReleased.as_str(),
                &[("name", token.name.as_str()), ("token", token_str.as_str())],
            );
        } else {
            Logger::warn(
                Event::LockStaleUnlock.as_str(),
                &[("name", token.name.as_str()), ("token", token_str.as_str())],
            );
        }
        Ok(released)
    }

    /// True if some member holds an unexpired lease on `name`.
    pub fn is_locked(&self, name: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .current_value(&lease_field(name))?
            .as_ref()
            .and_then(parse_lease)
            .is_some_and(|lease| lease.lease_end > now))
    }

    fn ensure_document(&self) -> StoreResult<()> {
        let exists = self
            .backend
            .find(Collection::Settings, CLUSTER_LOCKS_ID)?
            .is_some();
        if !exists {
            // false means a concurrent member created it first
            self.backend.create(
                Collection::Settings,
                &[UpdateOp::new(CLUSTER_LOCKS_ID, true)],
            )?;
        }
        Ok(())
    }

    fn current_value(&self, field: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .backend
            .find(Collection::Settings, CLUSTER_LOCKS_ID)?
            .and_then(|doc| doc.get(field).cloned()))
    }
}

fn lease_field(name: &str) -> String {
    format!("{}-lease", name)
}

fn parse_lease(value: &Value) -> Option<Lease> {
    serde_json::from_value(value.clone()).ok()
}
