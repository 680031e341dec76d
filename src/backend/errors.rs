//! Backend error types

use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a `DocumentStore` implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Transient I/O failure; the operation may be retried.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored document cannot be interpreted.
    #[error("corrupt document {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// The request itself is malformed.
    #[error("invalid operation on {id}: {reason}")]
    InvalidOperation { id: String, reason: String },
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        BackendError::Unavailable(message.into())
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_operation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::InvalidOperation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}
