//! Checkpoints track reconciliation progress per (document, actor)

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Progress marker for a (document, actor) pair
///
/// `server_seq` is the last server-assigned sequence the client has
/// received; `client_seq` is the last client change the server has durably
/// stored. Both components only ever move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Checkpoint {
    pub server_seq: u64,
    pub client_seq: u32,
}

impl Checkpoint {
    /// Checkpoint of a client that has not synced anything yet
    pub const INITIAL: Checkpoint = Checkpoint {
        server_seq: 0,
        client_seq: 0,
    };

    pub fn new(server_seq: u64, client_seq: u32) -> Self {
        Self {
            server_seq,
            client_seq,
        }
    }

    /// Advance the server sequence, never moving it backwards
    pub fn next_server_seq(self, server_seq: u64) -> Self {
        Self {
            server_seq: self.server_seq.max(server_seq),
            ..self
        }
    }

    /// Advance the client sequence, never moving it backwards
    pub fn sync_client_seq(self, client_seq: u32) -> Self {
        Self {
            client_seq: self.client_seq.max(client_seq),
            ..self
        }
    }

    /// Component-wise maximum of two checkpoints
    pub fn forward(self, other: Checkpoint) -> Self {
        Self {
            server_seq: self.server_seq.max(other.server_seq),
            client_seq: self.client_seq.max(other.client_seq),
        }
    }

    /// Whether both components are at least those of `other`
    pub fn dominates(&self, other: &Checkpoint) -> bool {
        self.server_seq >= other.server_seq && self.client_seq >= other.client_seq
    }
}

impl Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.server_seq, self.client_seq)
    }
}
