//! Error types for quill-coordinator

use thiserror::Error;

use quill_core::DoneReason;

use crate::LockKey;

/// Errors that can occur while acquiring or releasing a lock
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The caller's deadline passed before the lock was held
    #[error("Timed out acquiring lock {key}")]
    Timeout { key: LockKey },

    /// The caller cancelled before the lock was held
    #[error("Cancelled while acquiring lock {key}")]
    Cancelled { key: LockKey },

    /// The backing coordination service could not be reached
    #[error("Lock service unavailable: {0}")]
    Unavailable(String),

    /// Release of a lock this handle does not hold
    #[error("Lock not held: {key}")]
    NotHeld { key: LockKey },

    /// Second acquisition through the same handle
    #[error("Lock already held by this handle: {key}")]
    AlreadyHeld { key: LockKey },
}

impl LockError {
    /// Map a finished context onto the matching acquisition error
    pub fn from_done(key: &LockKey, reason: DoneReason) -> Self {
        match reason {
            DoneReason::Cancelled => LockError::Cancelled { key: key.clone() },
            DoneReason::DeadlineExceeded => LockError::Timeout { key: key.clone() },
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Whether retrying the acquisition later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::Timeout { .. } | LockError::Unavailable(_)
        )
    }
}
