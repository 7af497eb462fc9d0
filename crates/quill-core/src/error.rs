//! Error types for the Quill core model

use thiserror::Error;

use crate::status::DocumentStatus;

/// Top-level error type for the core model
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Status error: {0}")]
    Status(#[from] StatusError),

    #[error("Change pack error: {0}")]
    ChangePack(#[from] ChangePackError),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Errors related to parsing identifiers and keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Invalid actor id: {0}")]
    InvalidActorId(String),

    #[error("Invalid {kind} id: {value}")]
    InvalidObjectId { kind: &'static str, value: String },

    #[error("Invalid document key: {0}")]
    InvalidDocKey(String),
}

/// Errors related to the document lifecycle state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("Invalid document status transition: {from} -> {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Document has been removed: {0}")]
    DocumentRemoved(String),
}

/// Errors related to malformed change packs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangePackError {
    #[error("Changes are not ordered by client sequence: {previous} then {current}")]
    NotIncreasing { previous: u32, current: u32 },

    #[error("Change client sequence {client_seq} is not after checkpoint {checkpoint}")]
    BelowCheckpoint { client_seq: u32, checkpoint: u32 },

    #[error("Change pack mixes changes from several actors")]
    MixedActors,

    #[error("Change pack was not built for this client: {0}")]
    ForeignActor(String),

    #[error("Change pack checkpoint is ahead of the server: {0}")]
    AheadOfServer(String),
}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        CoreError::Encoding(err.to_string())
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_error_display() {
        let err = IdentityError::InvalidActorId("zz".to_string());
        assert!(err.to_string().contains("Invalid actor id"));
        assert!(err.to_string().contains("zz"));

        let err = IdentityError::InvalidObjectId {
            kind: "document",
            value: "nope".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("document"));
        assert!(msg.contains("nope"));
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::InvalidTransition {
            from: DocumentStatus::Detached,
            to: DocumentStatus::Attached,
        };
        let msg = err.to_string();
        assert!(msg.contains("detached"));
        assert!(msg.contains("attached"));
    }

    #[test]
    fn test_error_conversions() {
        let err: CoreError = IdentityError::InvalidDocKey("".to_string()).into();
        assert!(matches!(err, CoreError::Identity(_)));

        let err: CoreError = ChangePackError::MixedActors.into();
        assert!(matches!(err, CoreError::ChangePack(_)));

        let err: CoreError = StatusError::DocumentRemoved("doc".to_string()).into();
        assert!(matches!(err, CoreError::Status(_)));
    }
}
