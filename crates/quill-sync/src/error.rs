//! Error types for quill-sync

use thiserror::Error;

use quill_core::{ChangePackError, Checkpoint, StatusError};
use quill_storage::StorageError;

/// Errors that can occur while reconciling a document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Client is not active: {0}")]
    ClientNotActive(String),

    #[error("Document {doc} is not attached to client {client}")]
    ClientNotAttached { client: String, doc: String },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Failed to build document snapshot: {0}")]
    SnapshotBuildFailed(String),

    /// The pack was built against a checkpoint the server has moved past
    #[error("Stale change pack: built against {pack}, server is at {stored}")]
    StaleChangePack { pack: Checkpoint, stored: Checkpoint },

    #[error("Invalid change pack: {0}")]
    InvalidChangePack(#[from] ChangePackError),

    #[error("Invalid document status: {0}")]
    Status(#[from] StatusError),

    #[error("Persistence failure: {0}")]
    Persistence(StorageError),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ClientDeactivated(client) => SyncError::ClientNotActive(client),
            err => SyncError::Persistence(err),
        }
    }
}

impl SyncError {
    pub fn snapshot_build_failed(message: impl Into<String>) -> Self {
        Self::SnapshotBuildFailed(message.into())
    }

    /// Whether the caller can rebuild its pack and try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::StaleChangePack { .. }
                | SyncError::Persistence(StorageError::Conflict(_))
                | SyncError::Persistence(StorageError::Unavailable(_))
        )
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
