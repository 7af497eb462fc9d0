//! Error types for the node services

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use quill_coordinator::LockError;
use quill_core::{IdentityError, StatusError};
use quill_storage::StorageError;
use quill_sync::SyncError;

/// Errors returned by node services
#[derive(Debug, Error)]
pub enum NodeError {
    /// Malformed identifier or key in a request
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] IdentityError),

    /// Document lock could not be taken
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Reconciliation failure
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage backend could not be opened
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StatusError> for NodeError {
    fn from(err: StatusError) -> Self {
        NodeError::Sync(SyncError::Status(err))
    }
}

/// Transport-neutral classification of a [`NodeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unavailable,
    DeadlineExceeded,
    Aborted,
    Internal,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl NodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::InvalidArgument(_) | NodeError::Config(_) => ErrorCode::InvalidArgument,
            NodeError::Lock(err) => match err {
                LockError::Timeout { .. } | LockError::Cancelled { .. } => {
                    ErrorCode::DeadlineExceeded
                }
                LockError::Unavailable(_) => ErrorCode::Unavailable,
                LockError::NotHeld { .. } | LockError::AlreadyHeld { .. } => ErrorCode::Internal,
            },
            NodeError::Sync(err) => match err {
                SyncError::ClientNotFound(_) | SyncError::DocumentNotFound(_) => {
                    ErrorCode::NotFound
                }
                SyncError::ClientNotActive(_)
                | SyncError::ClientNotAttached { .. }
                | SyncError::Status(_) => ErrorCode::FailedPrecondition,
                SyncError::InvalidChangePack(_) => ErrorCode::InvalidArgument,
                SyncError::StaleChangePack { .. } => ErrorCode::Aborted,
                SyncError::SnapshotBuildFailed(_) => ErrorCode::Internal,
                SyncError::Persistence(storage) => storage_code(storage),
            },
            NodeError::Storage(err) => storage_code(err),
        }
    }

    /// Whether the caller may retry after rebuilding its request
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Lock(err) => err.is_retryable(),
            NodeError::Sync(err) => err.is_retryable(),
            _ => false,
        }
    }
}

fn storage_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::Conflict(_) => ErrorCode::Aborted,
        StorageError::Unavailable(_) | StorageError::Io(_) => ErrorCode::Unavailable,
        StorageError::NotFound(_) => ErrorCode::NotFound,
        StorageError::ClientDeactivated(_) => ErrorCode::FailedPrecondition,
        StorageError::Serialization(_)
        | StorageError::Deserialization(_)
        | StorageError::Database(_) => ErrorCode::Internal,
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
