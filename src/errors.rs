//! Store error taxonomy
//!
//! Error codes:
//! - STORE_CONFLICT (ERROR) - concurrent change, caller rebases and retries
//! - STORE_BACKEND_UNAVAILABLE (ERROR) - transient backend failure
//! - STORE_INVARIANT_VIOLATION (FATAL) - history cannot be resolved
//! - STORE_CLUSTER_ID_IN_USE (ERROR) - requested cluster id has a live lease
//! - STORE_LOCK_TIMEOUT (ERROR) - cluster lock not acquired in time
//! - STORE_INVALID_ARGUMENT (ERROR) - malformed request or configuration
//! - STORE_DISPOSED (ERROR) - node store already disposed
//!
//! An expired lease is never an error: it makes the lease free again.

use thiserror::Error;

use crate::backend::BackendError;
use crate::observability::Severity;
use crate::revision::Revision;

/// Result type for node store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the node store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A concurrent change touched the same state. Never resolved silently.
    #[error("conflict on {path} at {revision}: concurrent change {conflicting}")]
    Conflict {
        path: String,
        revision: Revision,
        conflicting: Revision,
    },

    /// The backend failed and retries were exhausted.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored history contradicts itself.
    #[error("invariant violation on {id}: {reason}")]
    InvariantViolation { id: String, reason: String },

    #[error("cluster id {0} is in use by a live process")]
    ClusterIdInUse(u32),

    #[error("timed out acquiring cluster lock '{0}'")]
    LockTimeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node store is disposed")]
    Disposed,
}

impl StoreError {
    pub fn conflict(path: impl Into<String>, revision: Revision, conflicting: Revision) -> Self {
        StoreError::Conflict {
            path: path.into(),
            revision,
            conflicting,
        }
    }

    pub fn invariant_violation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::InvariantViolation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StoreError::InvalidArgument(message.into())
    }

    /// Returns the error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Conflict { .. } => "STORE_CONFLICT",
            StoreError::BackendUnavailable(_) => "STORE_BACKEND_UNAVAILABLE",
            StoreError::InvariantViolation { .. } => "STORE_INVARIANT_VIOLATION",
            StoreError::ClusterIdInUse(_) => "STORE_CLUSTER_ID_IN_USE",
            StoreError::LockTimeout(_) => "STORE_LOCK_TIMEOUT",
            StoreError::InvalidArgument(_) => "STORE_INVALID_ARGUMENT",
            StoreError::Disposed => "STORE_DISPOSED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StoreError::InvariantViolation { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Returns true if the same call may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::BackendUnavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(message) => StoreError::BackendUnavailable(message),
            BackendError::Corrupt { id, reason } => StoreError::InvariantViolation { id, reason },
            BackendError::InvalidOperation { id, reason } => {
                StoreError::InvalidArgument(format!("{}: {}", id, reason))
            }
        }
    }
}
