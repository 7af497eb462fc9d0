//! Materialized document state and snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::{Change, Operation};
use crate::error::CoreError;
use crate::ids::{ActorId, DocId};
use crate::presence::{Presence, PresenceChange};

/// Result of replaying a prefix of a document's change history
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentState {
    root: BTreeMap<String, Vec<u8>>,
    presences: BTreeMap<ActorId, Presence>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one change in server order
    pub fn apply_change(&mut self, change: &Change) {
        for op in &change.operations {
            match op {
                Operation::Set { key, value } => {
                    self.root.insert(key.clone(), value.clone());
                }
                Operation::Remove { key } => {
                    self.root.remove(key);
                }
            }
        }

        match &change.presence_change {
            Some(PresenceChange::Put(presence)) => {
                self.presences.insert(change.actor(), presence.clone());
            }
            Some(PresenceChange::Clear) => {
                self.presences.remove(&change.actor());
            }
            None => {}
        }
    }

    pub fn apply_changes<'a>(&mut self, changes: impl IntoIterator<Item = &'a Change>) {
        for change in changes {
            self.apply_change(change);
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.root.get(key).map(Vec::as_slice)
    }

    pub fn root(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.root
    }

    pub fn presence(&self, actor: &ActorId) -> Option<&Presence> {
        self.presences.get(actor)
    }

    pub fn presences(&self) -> &BTreeMap<ActorId, Presence> {
        &self.presences
    }

    /// Encode for storage or for a snapshot-carrying change pack
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Stored document state as of a server sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub doc_id: DocId,
    pub server_seq: u64,
    pub lamport: u64,
    pub state: DocumentState,
}

impl Snapshot {
    pub fn new(doc_id: DocId, server_seq: u64, lamport: u64, state: DocumentState) -> Self {
        Self {
            doc_id,
            server_seq,
            lamport,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeId;

    fn change(actor: ActorId, seq: u32, ops: Vec<Operation>, presence: Option<PresenceChange>) -> Change {
        Change::new(ChangeId::new(seq, seq as u64, actor), None, ops, presence)
    }

    #[test]
    fn test_last_write_wins_in_order() {
        let a = ActorId::generate();
        let mut state = DocumentState::new();
        state.apply_changes(&[
            change(a, 1, vec![Operation::set("title", b"one".to_vec())], None),
            change(a, 2, vec![Operation::set("title", b"two".to_vec())], None),
            change(a, 3, vec![Operation::set("body", b"x".to_vec()), Operation::remove("body")], None),
        ]);

        assert_eq!(state.get("title"), Some(&b"two"[..]));
        assert_eq!(state.get("body"), None);
    }

    #[test]
    fn test_presence_put_and_clear() {
        let a = ActorId::generate();
        let b = ActorId::generate();
        let presence: Presence = [("cursor", "3")].into_iter().collect();

        let mut state = DocumentState::new();
        state.apply_change(&change(a, 1, vec![], Some(PresenceChange::Put(presence.clone()))));
        state.apply_change(&change(b, 1, vec![], Some(PresenceChange::Put(presence.clone()))));
        assert_eq!(state.presences().len(), 2);

        state.apply_change(&change(a, 2, vec![], Some(PresenceChange::Clear)));
        assert!(state.presence(&a).is_none());
        assert_eq!(state.presence(&b), Some(&presence));
    }

    #[test]
    fn test_state_encoding() {
        let a = ActorId::generate();
        let mut state = DocumentState::new();
        state.apply_change(&change(a, 1, vec![Operation::set("k", b"v".to_vec())], None));

        let bytes = state.to_bytes().unwrap();
        assert_eq!(DocumentState::from_bytes(&bytes).unwrap(), state);
        assert!(DocumentState::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
