//! Node store configuration
//!
//! Loaded from JSON (every field optional) or built in code. Thresholds
//! for history splitting are deployment policy, not correctness
//! parameters.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};

/// Configuration of one `DocumentNodeStore` instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Requested cluster id. `None` picks the lowest free id.
    pub cluster_id: Option<u32>,

    /// Period of the background thread. 0 disables the thread.
    pub async_delay_ms: u64,

    /// Duration of the cluster membership lease.
    pub lease_duration_ms: u64,

    /// Split a document once this many revisions of this member can move.
    pub num_revs_threshold: usize,

    /// Split a document once it holds this many movable commit markers for
    /// changes below it.
    pub children_threshold: usize,

    /// Stripes of the document lock pool.
    pub lock_stripes: usize,

    /// Cache confirmed absences from previous document scans.
    pub prev_no_prop_cache: bool,

    pub prev_no_prop_cache_size: usize,

    /// Entries of the memory diff cache.
    pub diff_cache_size: usize,

    /// Main documents kept in memory, the root document not counted.
    pub document_cache_size: usize,

    /// Resolved commit revisions of changes committed through another
    /// document.
    pub commit_value_cache_size: usize,

    /// Retries of a transient backend failure in a foreground operation.
    pub max_backend_retries: u32,

    /// Base delay between backend retries, multiplied by the attempt.
    pub backend_retry_delay_ms: u64,

    /// Lease of a cluster lock.
    pub lock_lease_ms: u64,

    /// How long `lock` keeps retrying before giving up.
    pub lock_acquire_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cluster_id: None,
            async_delay_ms: 1000,
            lease_duration_ms: 120_000,
            num_revs_threshold: 100,
            children_threshold: 50,
            lock_stripes: crate::locks::DEFAULT_STRIPES,
            prev_no_prop_cache: true,
            prev_no_prop_cache_size: 10_000,
            diff_cache_size: 1_000,
            document_cache_size: 10_000,
            commit_value_cache_size: 10_000,
            max_backend_retries: 3,
            backend_retry_delay_ms: 10,
            lock_lease_ms: 60_000,
            lock_acquire_timeout_ms: 60_000,
        }
    }
}

impl StoreConfig {
    /// Config for a fixed cluster id without background thread.
    pub fn for_cluster(cluster_id: u32) -> Self {
        Self {
            cluster_id: Some(cluster_id),
            async_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Reads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::invalid_argument(format!(
                "failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = serde_json::from_str(&content).map_err(|e| {
            StoreError::invalid_argument(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.cluster_id == Some(0) {
            return Err(StoreError::invalid_argument("cluster id 0 is reserved"));
        }
        if self.lease_duration_ms == 0 {
            return Err(StoreError::invalid_argument("lease duration must be positive"));
        }
        if self.num_revs_threshold == 0 || self.children_threshold == 0 {
            return Err(StoreError::invalid_argument("split thresholds must be positive"));
        }
        if self.lock_stripes == 0 {
            return Err(StoreError::invalid_argument("lock stripes must be positive"));
        }
        if self.document_cache_size == 0 {
            return Err(StoreError::invalid_argument("document cache size must be positive"));
        }
        if self.lock_lease_ms == 0 {
            return Err(StoreError::invalid_argument("lock lease must be positive"));
        }
        Ok(())
    }

    pub fn async_delay(&self) -> Option<Duration> {
        match self.async_delay_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_revs_threshold, 100);
        assert_eq!(config.lock_stripes, 4096);
        assert!(config.prev_no_prop_cache);
    }

    #[test]
    fn test_for_cluster_disables_background_thread() {
        let config = StoreConfig::for_cluster(2);
        assert_eq!(config.cluster_id, Some(2));
        assert!(config.async_delay().is_none());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = StoreConfig::default();
        config.num_revs_threshold = 0;
        assert!(config.validate().is_err());

        let config = StoreConfig {
            cluster_id: Some(0),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());

        let config = StoreConfig {
            document_cache_size: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cluster_id": 3, "num_revs_threshold": 10}}"#).unwrap();
        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cluster_id, Some(3));
        assert_eq!(config.num_revs_threshold, 10);
        assert_eq!(config.children_threshold, 50);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"lock_stripes": 0}}"#).unwrap();
        assert!(StoreConfig::from_file(file.path()).is_err());

        assert!(StoreConfig::from_file("/nonexistent/revstore.json").is_err());
    }
}
