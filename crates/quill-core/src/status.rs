//! Document lifecycle and client status
//!
//! The lifecycle of a (client, document) pair is an explicit tagged enum
//! with a closed transition table:
//!
//! | from       | to         | trigger                 |
//! |------------|------------|-------------------------|
//! | `Attached` | `Attached` | push/pull traffic       |
//! | `Attached` | `Detached` | detach                  |
//! | `Detached` | `Removed`  | remove (terminal)       |
//!
//! Attaching is the entry point into the machine and is handled by
//! [`ClientInfo::attach_document`](crate::records::ClientInfo::attach_document).

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Lifecycle status of a document for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Attached,
    Detached,
    Removed,
}

impl DocumentStatus {
    /// Whether the transition table allows `self -> to`
    pub fn can_transition_to(self, to: DocumentStatus) -> bool {
        matches!(
            (self, to),
            (DocumentStatus::Attached, DocumentStatus::Attached)
                | (DocumentStatus::Attached, DocumentStatus::Detached)
                | (DocumentStatus::Detached, DocumentStatus::Removed)
        )
    }

    /// Apply a transition, rejecting anything not in the table
    pub fn transition(self, to: DocumentStatus) -> Result<DocumentStatus, StatusError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(StatusError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == DocumentStatus::Removed
    }
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Attached => write!(f, "attached"),
            DocumentStatus::Detached => write!(f, "detached"),
            DocumentStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Activation status of a client record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientStatus {
    Activated,
    Deactivated,
}

impl Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientStatus::Activated => write!(f, "activated"),
            ClientStatus::Deactivated => write!(f, "deactivated"),
        }
    }
}

/// Direction of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncMode {
    #[default]
    PushPull,
    PushOnly,
    PullOnly,
}

impl SyncMode {
    pub fn includes_push(self) -> bool {
        matches!(self, SyncMode::PushPull | SyncMode::PushOnly)
    }

    pub fn includes_pull(self) -> bool {
        matches!(self, SyncMode::PushPull | SyncMode::PullOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn test_transition_table_is_closed() {
        let all = [Attached, Detached, Removed];
        let allowed = [(Attached, Attached), (Attached, Detached), (Detached, Removed)];

        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
                assert_eq!(from.transition(to).is_ok(), expected);
            }
        }
    }

    #[test]
    fn test_removed_is_terminal() {
        assert!(Removed.is_terminal());
        assert!(matches!(
            Removed.transition(Attached),
            Err(StatusError::InvalidTransition { from: Removed, .. })
        ));
    }

    #[test]
    fn test_sync_mode_directions() {
        assert!(SyncMode::PushPull.includes_push() && SyncMode::PushPull.includes_pull());
        assert!(SyncMode::PushOnly.includes_push() && !SyncMode::PushOnly.includes_pull());
        assert!(!SyncMode::PullOnly.includes_push() && SyncMode::PullOnly.includes_pull());
    }
}
