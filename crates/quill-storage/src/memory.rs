//! In-memory database
//!
//! All maps live behind one `RwLock`, so a push-pull commit is applied
//! under a single write guard and readers never observe half of it.
//! Fault injection switches let tests exercise persistence and snapshot
//! failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use quill_core::{
    Change, ClientInfo, ClientRefKey, DocId, DocInfo, DocKey, DocRefKey, ProjectId, Snapshot,
};

use crate::error::{StorageError, StorageResult};
use crate::{Database, PushPullCommit};

#[derive(Debug, Default)]
struct State {
    clients: HashMap<ClientRefKey, ClientInfo>,
    docs: HashMap<DocRefKey, DocInfo>,
    doc_keys: HashMap<(ProjectId, DocKey), DocId>,
    changes: HashMap<DocRefKey, BTreeMap<u64, Change>>,
    snapshots: HashMap<DocRefKey, BTreeMap<u64, Snapshot>>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_commit: AtomicBool,
    fail_change_reads: AtomicBool,
    fail_snapshot_writes: AtomicBool,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    commits: AtomicU64,
}

/// In-memory [`Database`] for tests and single-node setups
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: RwLock<State>,
    faults: Faults,
    counters: Counters,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit_push_pull` fail without writing anything
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make change history reads fail until switched off
    pub fn set_fail_change_reads(&self, fail: bool) {
        self.faults.fail_change_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_snapshot_writes(&self, fail: bool) {
        self.faults.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of client or document record lookups served
    pub fn lookups(&self) -> u64 {
        self.counters.lookups.load(Ordering::SeqCst)
    }

    /// Number of successful push-pull commits
    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// Total number of persisted changes for a document
    pub fn change_count(&self, doc: &DocRefKey) -> usize {
        self.state.read().changes.get(doc).map_or(0, BTreeMap::len)
    }

    pub fn snapshot_count(&self, doc: &DocRefKey) -> usize {
        self.state.read().snapshots.get(doc).map_or(0, BTreeMap::len)
    }

    fn record_lookup(&self) {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn activate_client(&self, project_id: ProjectId, key: &str) -> StorageResult<ClientInfo> {
        let info = ClientInfo::new(project_id, key);
        self.state.write().clients.insert(info.ref_key(), info.clone());
        debug!(client = %info.id, key, "Activated client");
        Ok(info)
    }

    async fn find_client_info_by_ref_key(
        &self,
        key: &ClientRefKey,
    ) -> StorageResult<Option<ClientInfo>> {
        self.record_lookup();
        Ok(self.state.read().clients.get(key).cloned())
    }

    async fn deactivate_client(&self, key: &ClientRefKey) -> StorageResult<ClientInfo> {
        let mut state = self.state.write();
        let info = state
            .clients
            .get_mut(key)
            .ok_or_else(|| StorageError::not_found(format!("client {}", key)))?;
        info.deactivate();
        debug!(client = %key, "Deactivated client");
        Ok(info.clone())
    }

    async fn find_or_create_doc_info(
        &self,
        owner: &ClientRefKey,
        key: &DocKey,
    ) -> StorageResult<DocInfo> {
        self.record_lookup();
        let mut state = self.state.write();
        let index = (owner.project_id, key.clone());

        if let Some(doc_id) = state.doc_keys.get(&index) {
            let ref_key = DocRefKey::new(owner.project_id, *doc_id);
            return state
                .docs
                .get(&ref_key)
                .cloned()
                .ok_or_else(|| StorageError::database(format!("dangling key index {}", key)));
        }

        let info = DocInfo::new(owner.project_id, key.clone(), owner.client_id);
        state.doc_keys.insert(index, info.id);
        state.docs.insert(info.ref_key(), info.clone());
        debug!(doc = %info.id, key = %key, "Created document");
        Ok(info)
    }

    async fn find_doc_info_by_ref_key(&self, key: &DocRefKey) -> StorageResult<Option<DocInfo>> {
        self.record_lookup();
        Ok(self.state.read().docs.get(key).cloned())
    }

    async fn find_doc_info_by_key(
        &self,
        project_id: &ProjectId,
        key: &DocKey,
    ) -> StorageResult<Option<DocInfo>> {
        self.record_lookup();
        let state = self.state.read();
        Ok(state
            .doc_keys
            .get(&(*project_id, key.clone()))
            .and_then(|doc_id| state.docs.get(&DocRefKey::new(*project_id, *doc_id)))
            .cloned())
    }

    async fn find_changes_between_server_seqs(
        &self,
        doc: &DocRefKey,
        from: u64,
        to: u64,
    ) -> StorageResult<Vec<Change>> {
        if self.faults.fail_change_reads.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("injected change read failure"));
        }
        if from > to {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        Ok(state
            .changes
            .get(doc)
            .map(|changes| changes.range(from..=to).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn find_closest_snapshot(
        &self,
        doc: &DocRefKey,
        server_seq: u64,
    ) -> StorageResult<Option<Snapshot>> {
        let state = self.state.read();
        Ok(state
            .snapshots
            .get(doc)
            .and_then(|snapshots| snapshots.range(..=server_seq).next_back())
            .map(|(_, s)| s.clone()))
    }

    async fn store_snapshot(&self, doc: &DocRefKey, snapshot: &Snapshot) -> StorageResult<()> {
        if self.faults.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable("injected snapshot write failure"));
        }
        self.state
            .write()
            .snapshots
            .entry(*doc)
            .or_default()
            .insert(snapshot.server_seq, snapshot.clone());
        trace!(doc = %doc, server_seq = snapshot.server_seq, "Stored snapshot");
        Ok(())
    }

    async fn commit_push_pull(&self, commit: PushPullCommit) -> StorageResult<ClientInfo> {
        if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::unavailable("injected commit failure"));
        }
        commit.validate()?;

        let doc_key = commit.doc_info.ref_key();
        let mut state = self.state.write();

        let stored_seq = state
            .docs
            .get(&doc_key)
            .map(|doc| doc.server_seq)
            .ok_or_else(|| StorageError::not_found(format!("document {}", doc_key)))?;
        if stored_seq != commit.base_server_seq {
            return Err(StorageError::conflict(format!(
                "document {} is at server_seq {}, commit based on {}",
                doc_key, stored_seq, commit.base_server_seq
            )));
        }
        let mut client_info = state
            .clients
            .get(&commit.client)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("client {}", commit.client)))?;
        commit.merge_client(&mut client_info)?;

        let persisted = commit.changes.len();
        let history = state.changes.entry(doc_key).or_default();
        for change in commit.changes {
            history.insert(change.server_seq(), change);
        }

        if commit.doc_info.is_removed() {
            let index = (commit.doc_info.project_id, commit.doc_info.key.clone());
            if state.doc_keys.get(&index) == Some(&commit.doc_info.id) {
                state.doc_keys.remove(&index);
            }
        }
        state.docs.insert(doc_key, commit.doc_info);
        state.clients.insert(commit.client, client_info.clone());
        self.counters.commits.fetch_add(1, Ordering::SeqCst);

        trace!(doc = %doc_key, persisted, "Committed push-pull");
        Ok(client_info)
    }
}
