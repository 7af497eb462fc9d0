//! Materialized document with pending local changes
//!
//! A [`Document`] is a replica at some checkpoint. Local edits made through
//! [`Document::update`] are applied immediately and queued as changes;
//! [`Document::create_change_pack`] packages the queue for a push-pull.

use quill_core::{
    ActorId, Change, ChangeId, ChangePack, Checkpoint, DocKey, DocumentState, Operation, Presence,
    PresenceChange,
};

use crate::error::{SyncError, SyncResult};

/// Collects the mutations of one [`Document::update`] call
#[derive(Debug, Default)]
pub struct ChangeContext {
    operations: Vec<Operation>,
    presence: Option<PresenceChange>,
}

impl ChangeContext {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.operations.push(Operation::set(key, value));
    }

    pub fn remove(&mut self, key: impl Into<String>) {
        self.operations.push(Operation::remove(key));
    }

    /// Replace this actor's presence
    pub fn set_presence(&mut self, presence: Presence) {
        self.presence = Some(PresenceChange::Put(presence));
    }

    /// Reset this actor's presence to empty
    pub fn clear_presence(&mut self) {
        self.presence = Some(PresenceChange::Clear);
    }

    fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.presence.is_none()
    }
}

/// Replica of a document as seen by one actor
#[derive(Debug, Clone)]
pub struct Document {
    key: DocKey,
    state: DocumentState,
    checkpoint: Checkpoint,
    change_id: ChangeId,
    local_changes: Vec<Change>,
}

impl Document {
    /// Empty replica at the initial checkpoint
    pub fn new(key: DocKey, actor: ActorId) -> Self {
        Self {
            key,
            state: DocumentState::new(),
            checkpoint: Checkpoint::INITIAL,
            change_id: ChangeId::initial(actor),
            local_changes: Vec::new(),
        }
    }

    /// Replica materialized at `checkpoint`
    ///
    /// `lamport` is the highest lamport clock among the replayed changes, so
    /// the next local change orders after everything already applied.
    pub fn from_state(
        key: DocKey,
        state: DocumentState,
        checkpoint: Checkpoint,
        actor: ActorId,
        lamport: u64,
    ) -> Self {
        Self {
            key,
            state,
            checkpoint,
            change_id: ChangeId::new(checkpoint.client_seq, lamport, actor),
            local_changes: Vec::new(),
        }
    }

    pub fn key(&self) -> &DocKey {
        &self.key
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn actor(&self) -> ActorId {
        self.change_id.actor
    }

    pub fn presence(&self) -> Option<&Presence> {
        self.state.presence(&self.change_id.actor)
    }

    pub fn has_local_changes(&self) -> bool {
        !self.local_changes.is_empty()
    }

    /// Apply a local edit and queue it as a change
    ///
    /// An update that mutates nothing records no change.
    pub fn update(&mut self, message: Option<&str>, f: impl FnOnce(&mut ChangeContext)) {
        let mut ctx = ChangeContext::default();
        f(&mut ctx);
        if ctx.is_empty() {
            return;
        }

        self.change_id = self.change_id.next();
        let change = Change::new(
            self.change_id,
            message.map(str::to_string),
            ctx.operations,
            ctx.presence,
        );
        self.state.apply_change(&change);
        self.local_changes.push(change);
    }

    /// Pack of every local change not yet acknowledged
    pub fn create_change_pack(&self) -> ChangePack {
        ChangePack::new(
            self.key.clone(),
            self.checkpoint,
            self.local_changes.clone(),
        )
    }

    /// Apply a push-pull response
    ///
    /// Acknowledged local changes are dropped from the queue. A response
    /// carrying a snapshot replaces the state, after which still pending
    /// local changes are re-applied on top. Either way the lamport clock
    /// moves past every change the response covers.
    pub fn apply_change_pack(&mut self, pack: &ChangePack) -> SyncResult<()> {
        let acked = pack.checkpoint.client_seq;
        self.local_changes.retain(|c| c.client_seq() > acked);

        if let Some(bytes) = &pack.snapshot {
            self.state = DocumentState::from_bytes(bytes)
                .map_err(|e| SyncError::snapshot_build_failed(e.to_string()))?;
            for change in &self.local_changes {
                self.state.apply_change(change);
            }
            self.change_id = self.change_id.sync_lamport(pack.snapshot_lamport);
        } else {
            for change in &pack.changes {
                self.state.apply_change(change);
                self.change_id = self.change_id.sync_lamport(change.id.lamport);
            }
        }

        self.checkpoint = self.checkpoint.forward(pack.checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(DocKey::new("notes").unwrap(), ActorId::generate())
    }

    #[test]
    fn test_update_queues_change() {
        let mut doc = doc();
        doc.update(Some("title"), |ctx| ctx.set("title", b"hello".to_vec()));

        assert_eq!(doc.state().get("title"), Some(b"hello".as_slice()));
        let pack = doc.create_change_pack();
        assert_eq!(pack.changes_len(), 1);
        assert_eq!(pack.changes[0].client_seq(), 1);
        assert_eq!(pack.changes[0].message.as_deref(), Some("title"));
        assert!(pack.validate().is_ok());
    }

    #[test]
    fn test_empty_update_records_nothing() {
        let mut doc = doc();
        doc.update(None, |_| {});
        assert!(!doc.has_local_changes());
    }

    #[test]
    fn test_clear_presence() {
        let mut doc = doc();
        doc.update(None, |ctx| {
            ctx.set_presence([("cursor".to_string(), "3".to_string())].into_iter().collect())
        });
        assert_eq!(doc.presence().and_then(|p| p.get("cursor")), Some("3"));

        doc.update(None, |ctx| ctx.clear_presence());
        assert!(doc.presence().is_none());

        let pack = doc.create_change_pack();
        assert_eq!(pack.changes_len(), 2);
        assert!(pack.changes[1].is_presence_only());
    }

    #[test]
    fn test_local_changes_follow_checkpoint() {
        let actor = ActorId::generate();
        let mut doc = Document::from_state(
            DocKey::new("notes").unwrap(),
            DocumentState::new(),
            Checkpoint::new(5, 3),
            actor,
            9,
        );
        doc.update(None, |ctx| ctx.clear_presence());

        let pack = doc.create_change_pack();
        assert_eq!(pack.checkpoint, Checkpoint::new(5, 3));
        assert_eq!(pack.changes[0].client_seq(), 4);
        assert_eq!(pack.changes[0].id.lamport, 10);
        assert_eq!(pack.changes[0].actor(), actor);
    }

    #[test]
    fn test_apply_response_drops_acked_changes() {
        let mut doc = doc();
        doc.update(None, |ctx| ctx.set("a", b"1".to_vec()));
        doc.update(None, |ctx| ctx.set("b", b"2".to_vec()));

        let remote = Change::new(
            ChangeId::new(1, 7, ActorId::generate()).with_server_seq(1),
            None,
            vec![Operation::set("c", b"3".to_vec())],
            None,
        );
        let response = ChangePack::new(doc.key().clone(), Checkpoint::new(3, 1), vec![remote]);
        doc.apply_change_pack(&response).unwrap();

        assert_eq!(doc.checkpoint(), Checkpoint::new(3, 1));
        assert_eq!(doc.state().get("c"), Some(b"3".as_slice()));
        let pending = doc.create_change_pack();
        assert_eq!(pending.changes_len(), 1);
        assert_eq!(pending.changes[0].client_seq(), 2);

        // lamport moved past the remote change
        doc.update(None, |ctx| ctx.remove("a"));
        assert!(doc.create_change_pack().changes[1].id.lamport > 7);
    }

    #[test]
    fn test_apply_snapshot_response() {
        let mut doc = doc();
        doc.update(None, |ctx| ctx.set("local", b"x".to_vec()));

        let mut remote_state = DocumentState::new();
        remote_state.apply_change(&Change::new(
            ChangeId::new(1, 1, ActorId::generate()),
            None,
            vec![Operation::set("remote", b"y".to_vec())],
            None,
        ));
        let mut response = ChangePack::empty(doc.key().clone(), Checkpoint::new(40, 0));
        response.snapshot = Some(remote_state.to_bytes().unwrap());
        response.snapshot_lamport = 25;
        doc.apply_change_pack(&response).unwrap();

        assert_eq!(doc.state().get("remote"), Some(b"y".as_slice()));
        assert_eq!(doc.state().get("local"), Some(b"x".as_slice()));
        assert_eq!(doc.checkpoint().server_seq, 40);

        // the pending change keeps its id, the next one orders after the snapshot
        doc.update(None, |ctx| ctx.set("after", b"z".to_vec()));
        let pack = doc.create_change_pack();
        assert_eq!(pack.changes[0].id.lamport, 1);
        assert_eq!(pack.changes[1].client_seq(), 2);
        assert_eq!(pack.changes[1].id.lamport, 26);
    }

    #[test]
    fn test_snapshot_never_moves_lamport_back() {
        let mut doc = doc();
        for i in 0..5 {
            doc.update(None, |ctx| ctx.set(format!("k{i}"), b"v".to_vec()));
        }

        let mut response = ChangePack::empty(doc.key().clone(), Checkpoint::new(9, 5));
        response.snapshot = Some(doc.state().to_bytes().unwrap());
        response.snapshot_lamport = 2;
        doc.apply_change_pack(&response).unwrap();

        assert!(!doc.has_local_changes());
        doc.update(None, |ctx| ctx.remove("k0"));
        assert_eq!(doc.create_change_pack().changes[0].id.lamport, 6);
    }
}
