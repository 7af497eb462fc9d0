//! Changes and change packs
//!
//! A [`Change`] is an opaque, ordered mutation authored by one actor. The
//! server never interprets operations beyond replaying them in order; a
//! [`ChangePack`] bundles a client's pending changes with the checkpoint
//! they were built against.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::ChangePackError;
use crate::ids::{ActorId, DocKey};
use crate::presence::PresenceChange;

/// Identity and ordering metadata of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeId {
    /// Per-actor sequence, assigned by the author
    pub client_seq: u32,
    /// Per-document sequence, assigned by the server on persistence (0 until then)
    pub server_seq: u64,
    /// Lamport clock of the change
    pub lamport: u64,
    /// Author of the change
    pub actor: ActorId,
}

impl ChangeId {
    /// Change id preceding the first change of an actor
    pub fn initial(actor: ActorId) -> Self {
        Self {
            client_seq: 0,
            server_seq: 0,
            lamport: 0,
            actor,
        }
    }

    pub fn new(client_seq: u32, lamport: u64, actor: ActorId) -> Self {
        Self {
            client_seq,
            server_seq: 0,
            lamport,
            actor,
        }
    }

    /// Id of the next change by the same actor
    pub fn next(&self) -> Self {
        Self {
            client_seq: self.client_seq + 1,
            server_seq: 0,
            lamport: self.lamport + 1,
            actor: self.actor,
        }
    }

    /// Advance the lamport clock past a remote change
    pub fn sync_lamport(&self, other_lamport: u64) -> Self {
        Self {
            lamport: self.lamport.max(other_lamport),
            ..*self
        }
    }

    pub fn with_server_seq(self, server_seq: u64) -> Self {
        Self { server_seq, ..self }
    }

    pub fn with_actor(self, actor: ActorId) -> Self {
        Self { actor, ..self }
    }
}

/// Opaque mutation of the document root
///
/// The sync core does not merge operations; it only replays them in
/// server order, which makes the last write per key win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Set { key: String, value: Vec<u8> },
    Remove { key: String },
}

impl Operation {
    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Operation::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Operation::Remove { key: key.into() }
    }
}

/// An immutable, attributed mutation of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub message: Option<String>,
    pub operations: Vec<Operation>,
    pub presence_change: Option<PresenceChange>,
}

impl Change {
    pub fn new(
        id: ChangeId,
        message: Option<String>,
        operations: Vec<Operation>,
        presence_change: Option<PresenceChange>,
    ) -> Self {
        Self {
            id,
            message,
            operations,
            presence_change,
        }
    }

    pub fn client_seq(&self) -> u32 {
        self.id.client_seq
    }

    pub fn server_seq(&self) -> u64 {
        self.id.server_seq
    }

    pub fn actor(&self) -> ActorId {
        self.id.actor
    }

    /// Whether the change only touches presence
    pub fn is_presence_only(&self) -> bool {
        self.operations.is_empty() && self.presence_change.is_some()
    }

    /// Copy of this change stamped with a server sequence
    pub fn with_server_seq(&self, server_seq: u64) -> Self {
        Self {
            id: self.id.with_server_seq(server_seq),
            ..self.clone()
        }
    }
}

/// Ordered bundle of changes plus the checkpoint they apply against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePack {
    pub doc_key: DocKey,
    pub checkpoint: Checkpoint,
    pub changes: Vec<Change>,
    /// Encoded document state, sent instead of changes when the gap is large
    pub snapshot: Option<Vec<u8>>,
    /// Highest lamport clock among the changes folded into `snapshot`
    pub snapshot_lamport: u64,
    pub is_removed: bool,
}

impl ChangePack {
    pub fn new(doc_key: DocKey, checkpoint: Checkpoint, changes: Vec<Change>) -> Self {
        Self {
            doc_key,
            checkpoint,
            changes,
            snapshot: None,
            snapshot_lamport: 0,
            is_removed: false,
        }
    }

    /// Pack with no changes, used for pure pulls
    pub fn empty(doc_key: DocKey, checkpoint: Checkpoint) -> Self {
        Self::new(doc_key, checkpoint, Vec::new())
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes_len(&self) -> usize {
        self.changes.len()
    }

    /// Highest client sequence in the pack, or the checkpoint's if empty
    pub fn last_client_seq(&self) -> u32 {
        self.changes
            .last()
            .map(Change::client_seq)
            .unwrap_or(self.checkpoint.client_seq)
    }

    /// Check the structural invariants of a pack
    ///
    /// Changes must come from a single actor, follow the checkpoint and be
    /// strictly increasing by client sequence.
    pub fn validate(&self) -> Result<(), ChangePackError> {
        let Some(first) = self.changes.first() else {
            return Ok(());
        };

        if first.client_seq() <= self.checkpoint.client_seq {
            return Err(ChangePackError::BelowCheckpoint {
                client_seq: first.client_seq(),
                checkpoint: self.checkpoint.client_seq,
            });
        }

        for pair in self.changes.windows(2) {
            if pair[1].actor() != first.actor() {
                return Err(ChangePackError::MixedActors);
            }
            if pair[1].client_seq() <= pair[0].client_seq() {
                return Err(ChangePackError::NotIncreasing {
                    previous: pair[0].client_seq(),
                    current: pair[1].client_seq(),
                });
            }
        }

        Ok(())
    }
}
