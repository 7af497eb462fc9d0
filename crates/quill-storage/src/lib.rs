//! # Quill Storage
//!
//! Persistence of client records, document records, change history and
//! snapshots.
//!
//! The sync core only ever talks to a [`Database`]. Everything a push-pull
//! produces (new changes, the advanced document record and the client's
//! new checkpoint and status) is written by a single
//! [`Database::commit_push_pull`] call, which each backend applies
//! atomically: either all of it becomes visible or none of it does.
//!
//! ## Backends
//!
//! - [`MemoryDatabase`]: in-process maps, with fault injection for tests
//! - [`RedbDatabase`]: embedded file-backed store, one write transaction per commit

pub mod error;
pub mod memory;
pub mod persistent;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryDatabase;
pub use persistent::{RedbConfig, RedbDatabase};

use async_trait::async_trait;

use quill_core::{
    Change, ClientDocInfo, ClientInfo, ClientRefKey, DocInfo, DocKey, DocRefKey, ProjectId,
    Snapshot,
};

/// Everything one push-pull writes
///
/// The client record is shared between documents whose locks are
/// independent, so the commit carries only this document's entry. Backends
/// merge it into the record they hold at commit time.
#[derive(Debug, Clone)]
pub struct PushPullCommit {
    /// Document server sequence the commit was computed against
    pub base_server_seq: u64,
    /// Newly persisted changes, already stamped with server sequences
    pub changes: Vec<Change>,
    pub doc_info: DocInfo,
    pub client: ClientRefKey,
    /// The client's new status and checkpoint for `doc_info`
    pub client_doc: ClientDocInfo,
}

impl PushPullCommit {
    /// Merge this commit's entry into the currently stored client record
    pub fn merge_client(&self, stored: &mut ClientInfo) -> StorageResult<()> {
        if !stored.is_active() {
            return Err(StorageError::ClientDeactivated(self.client.to_string()));
        }
        stored.merge_document(self.doc_info.id, self.client_doc);
        Ok(())
    }

    /// Check that the stamped changes continue the base sequence
    pub fn validate(&self) -> StorageResult<()> {
        let mut expected = self.base_server_seq;
        for change in &self.changes {
            expected += 1;
            if change.server_seq() != expected {
                return Err(StorageError::conflict(format!(
                    "change server_seq {} where {} was expected",
                    change.server_seq(),
                    expected
                )));
            }
        }
        if self.doc_info.server_seq != expected {
            return Err(StorageError::conflict(format!(
                "document server_seq {} does not match last change {}",
                self.doc_info.server_seq, expected
            )));
        }
        Ok(())
    }
}

/// Storage collaborator of the sync core
#[async_trait]
pub trait Database: Send + Sync {
    /// Store a new activated client and return it
    async fn activate_client(&self, project_id: ProjectId, key: &str) -> StorageResult<ClientInfo>;

    async fn find_client_info_by_ref_key(
        &self,
        key: &ClientRefKey,
    ) -> StorageResult<Option<ClientInfo>>;

    /// Mark a stored client deactivated and return the stored record
    ///
    /// Only the status changes; document entries written concurrently by
    /// push-pulls are kept.
    async fn deactivate_client(&self, key: &ClientRefKey) -> StorageResult<ClientInfo>;

    /// Live document for `key`, created and owned by `owner` if missing
    ///
    /// Removed documents release their key, so a later call creates a
    /// fresh document.
    async fn find_or_create_doc_info(
        &self,
        owner: &ClientRefKey,
        key: &DocKey,
    ) -> StorageResult<DocInfo>;

    async fn find_doc_info_by_ref_key(&self, key: &DocRefKey) -> StorageResult<Option<DocInfo>>;

    /// Live document for `key` in a project
    async fn find_doc_info_by_key(
        &self,
        project_id: &ProjectId,
        key: &DocKey,
    ) -> StorageResult<Option<DocInfo>>;

    /// Changes with `from <= server_seq <= to`, in server order
    async fn find_changes_between_server_seqs(
        &self,
        doc: &DocRefKey,
        from: u64,
        to: u64,
    ) -> StorageResult<Vec<Change>>;

    /// Latest snapshot whose server sequence is at most `server_seq`
    async fn find_closest_snapshot(
        &self,
        doc: &DocRefKey,
        server_seq: u64,
    ) -> StorageResult<Option<Snapshot>>;

    async fn store_snapshot(&self, doc: &DocRefKey, snapshot: &Snapshot) -> StorageResult<()>;

    /// Atomically persist the outcome of one push-pull
    ///
    /// Fails with [`StorageError::Conflict`] when the stored document has
    /// moved past `base_server_seq`, and with
    /// [`StorageError::ClientDeactivated`] when the client was deactivated
    /// in the meantime; nothing is written in either case. Returns the
    /// client record as merged.
    async fn commit_push_pull(&self, commit: PushPullCommit) -> StorageResult<ClientInfo>;
}
