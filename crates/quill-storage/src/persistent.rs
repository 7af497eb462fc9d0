//! redb-backed database
//!
//! Records are postcard-encoded under fixed-width byte keys:
//!
//! - clients: `project ++ client`
//! - documents: `project ++ doc`
//! - live key index: `project ++ doc key`
//! - changes and snapshots: `project ++ doc ++ server_seq (big endian)`
//!
//! Big-endian sequence suffixes keep each document's history ordered, so
//! range scans return changes in server order. A push-pull commit is a
//! single write transaction.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, trace};

use quill_core::{
    Change, ClientInfo, ClientRefKey, DocId, DocInfo, DocKey, DocRefKey, ID_LEN, ProjectId,
    Snapshot,
};

use crate::error::{StorageError, StorageResult};
use crate::{Database, PushPullCommit};

// Key: project ++ client, Value: serialized ClientInfo
const CLIENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("clients");

// Key: project ++ doc, Value: serialized DocInfo
const DOCS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("docs");

// Key: project ++ doc key, Value: doc id bytes
const DOC_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("doc_keys");

// Key: project ++ doc ++ server_seq, Value: serialized Change
const CHANGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("changes");

// Key: project ++ doc ++ server_seq, Value: serialized Snapshot
const SNAPSHOTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("snapshots");

/// Configuration for the redb backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedbConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/quill.redb"),
            cache_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl RedbConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }
}

fn db_err(err: impl std::fmt::Display) -> StorageError {
    StorageError::Database(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| StorageError::serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    Ok(postcard::from_bytes(bytes)?)
}

fn client_key(key: &ClientRefKey) -> Vec<u8> {
    [key.project_id.as_bytes().as_slice(), key.client_id.as_bytes().as_slice()].concat()
}

fn doc_key(key: &DocRefKey) -> Vec<u8> {
    [key.project_id.as_bytes().as_slice(), key.doc_id.as_bytes().as_slice()].concat()
}

fn doc_key_index(project_id: &ProjectId, key: &DocKey) -> Vec<u8> {
    [project_id.as_bytes().as_slice(), key.as_str().as_bytes()].concat()
}

fn seq_key(doc: &DocRefKey, server_seq: u64) -> Vec<u8> {
    let mut key = doc_key(doc);
    key.extend_from_slice(&server_seq.to_be_bytes());
    key
}

fn decode_doc_id(bytes: &[u8]) -> StorageResult<DocId> {
    let raw: [u8; ID_LEN] = bytes
        .try_into()
        .map_err(|_| StorageError::deserialization("doc id has wrong length"))?;
    Ok(DocId::new(raw))
}

/// File-backed [`Database`]
pub struct RedbDatabase {
    db: Arc<redb::Database>,
    config: RedbConfig,
}

impl RedbDatabase {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.path.display()))]
    pub fn open(config: RedbConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = redb::Builder::new()
            .set_cache_size(config.cache_size)
            .create(&config.path)
            .map_err(db_err)?;
        info!("Opened redb database");

        let database = Self {
            db: Arc::new(db),
            config,
        };
        database.init_tables()?;
        Ok(database)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        for table in [CLIENTS, DOCS, DOC_KEYS, CHANGES, SNAPSHOTS] {
            write_txn.open_table(table).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        debug!("Initialized redb tables");
        Ok(())
    }

    pub fn config(&self) -> &RedbConfig {
        &self.config
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table).map_err(db_err)?;
        let bytes = table.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
        bytes.map(|b| decode(&b)).transpose()
    }

    fn put<T: Serialize>(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
        value: &T,
    ) -> StorageResult<()> {
        let bytes = encode(value)?;
        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(table).map_err(db_err)?;
            table.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl Database for RedbDatabase {
    async fn activate_client(&self, project_id: ProjectId, key: &str) -> StorageResult<ClientInfo> {
        let info = ClientInfo::new(project_id, key);
        self.put(CLIENTS, &client_key(&info.ref_key()), &info)?;
        debug!(client = %info.id, key, "Activated client");
        Ok(info)
    }

    async fn find_client_info_by_ref_key(
        &self,
        key: &ClientRefKey,
    ) -> StorageResult<Option<ClientInfo>> {
        self.get(CLIENTS, &client_key(key))
    }

    async fn deactivate_client(&self, key: &ClientRefKey) -> StorageResult<ClientInfo> {
        let record = client_key(key);
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let info = {
            let mut table = write_txn.open_table(CLIENTS).map_err(db_err)?;
            let mut info: ClientInfo = match table.get(record.as_slice()).map_err(db_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Err(StorageError::not_found(format!("client {}", key))),
            };
            info.deactivate();
            table
                .insert(record.as_slice(), encode(&info)?.as_slice())
                .map_err(db_err)?;
            info
        };
        write_txn.commit().map_err(db_err)?;
        debug!(client = %key, "Deactivated client");
        Ok(info)
    }

    async fn find_or_create_doc_info(
        &self,
        owner: &ClientRefKey,
        key: &DocKey,
    ) -> StorageResult<DocInfo> {
        let index = doc_key_index(&owner.project_id, key);
        let write_txn = self.db.begin_write().map_err(db_err)?;

        let info = {
            let mut keys = write_txn.open_table(DOC_KEYS).map_err(db_err)?;
            let mut docs = write_txn.open_table(DOCS).map_err(db_err)?;

            let existing = keys
                .get(index.as_slice())
                .map_err(db_err)?
                .map(|v| v.value().to_vec());

            match existing {
                Some(id_bytes) => {
                    let ref_key = DocRefKey::new(owner.project_id, decode_doc_id(&id_bytes)?);
                    let bytes = docs
                        .get(doc_key(&ref_key).as_slice())
                        .map_err(db_err)?
                        .map(|v| v.value().to_vec())
                        .ok_or_else(|| {
                            StorageError::database(format!("dangling key index {}", key))
                        })?;
                    return decode(&bytes);
                }
                None => {
                    let info = DocInfo::new(owner.project_id, key.clone(), owner.client_id);
                    keys.insert(index.as_slice(), info.id.as_bytes().as_slice())
                        .map_err(db_err)?;
                    docs.insert(doc_key(&info.ref_key()).as_slice(), encode(&info)?.as_slice())
                        .map_err(db_err)?;
                    info
                }
            }
        };

        write_txn.commit().map_err(db_err)?;
        debug!(doc = %info.id, key = %key, "Created document");
        Ok(info)
    }

    async fn find_doc_info_by_ref_key(&self, key: &DocRefKey) -> StorageResult<Option<DocInfo>> {
        self.get(DOCS, &doc_key(key))
    }

    async fn find_doc_info_by_key(
        &self,
        project_id: &ProjectId,
        key: &DocKey,
    ) -> StorageResult<Option<DocInfo>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let keys = read_txn.open_table(DOC_KEYS).map_err(db_err)?;
        let Some(id_bytes) = keys
            .get(doc_key_index(project_id, key).as_slice())
            .map_err(db_err)?
            .map(|v| v.value().to_vec())
        else {
            return Ok(None);
        };

        let ref_key = DocRefKey::new(*project_id, decode_doc_id(&id_bytes)?);
        let docs = read_txn.open_table(DOCS).map_err(db_err)?;
        let bytes = docs
            .get(doc_key(&ref_key).as_slice())
            .map_err(db_err)?
            .map(|v| v.value().to_vec());
        bytes.map(|b| decode(&b)).transpose()
    }

    async fn find_changes_between_server_seqs(
        &self,
        doc: &DocRefKey,
        from: u64,
        to: u64,
    ) -> StorageResult<Vec<Change>> {
        if from > to {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(CHANGES).map_err(db_err)?;
        let start = seq_key(doc, from);
        let end = seq_key(doc, to);

        let mut changes = Vec::new();
        for entry in table
            .range(start.as_slice()..=end.as_slice())
            .map_err(db_err)?
        {
            let (_, value) = entry.map_err(db_err)?;
            changes.push(decode(value.value())?);
        }
        Ok(changes)
    }

    async fn find_closest_snapshot(
        &self,
        doc: &DocRefKey,
        server_seq: u64,
    ) -> StorageResult<Option<Snapshot>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(SNAPSHOTS).map_err(db_err)?;
        let start = seq_key(doc, 0);
        let end = seq_key(doc, server_seq);

        let last = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(db_err)?
            .next_back()
            .transpose()
            .map_err(db_err)?
            .map(|(_, value)| value.value().to_vec());
        last.map(|b| decode(&b)).transpose()
    }

    async fn store_snapshot(&self, doc: &DocRefKey, snapshot: &Snapshot) -> StorageResult<()> {
        self.put(SNAPSHOTS, &seq_key(doc, snapshot.server_seq), snapshot)?;
        trace!(doc = %doc, server_seq = snapshot.server_seq, "Stored snapshot");
        Ok(())
    }

    #[instrument(skip(self, commit), fields(doc = %commit.doc_info.id, changes = commit.changes.len()))]
    async fn commit_push_pull(&self, commit: PushPullCommit) -> StorageResult<ClientInfo> {
        commit.validate()?;

        let doc_ref = commit.doc_info.ref_key();
        let client_ref = client_key(&commit.client);
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let client_info = {
            let mut docs = write_txn.open_table(DOCS).map_err(db_err)?;
            let mut clients = write_txn.open_table(CLIENTS).map_err(db_err)?;
            let mut changes = write_txn.open_table(CHANGES).map_err(db_err)?;
            let mut keys = write_txn.open_table(DOC_KEYS).map_err(db_err)?;

            let stored: DocInfo = match docs.get(doc_key(&doc_ref).as_slice()).map_err(db_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Err(StorageError::not_found(format!("document {}", doc_ref))),
            };
            if stored.server_seq != commit.base_server_seq {
                return Err(StorageError::conflict(format!(
                    "document {} is at server_seq {}, commit based on {}",
                    doc_ref, stored.server_seq, commit.base_server_seq
                )));
            }
            let mut client_info: ClientInfo =
                match clients.get(client_ref.as_slice()).map_err(db_err)? {
                    Some(bytes) => decode(bytes.value())?,
                    None => return Err(StorageError::not_found(format!("client {}", commit.client))),
                };
            commit.merge_client(&mut client_info)?;

            for change in &commit.changes {
                changes
                    .insert(
                        seq_key(&doc_ref, change.server_seq()).as_slice(),
                        encode(change)?.as_slice(),
                    )
                    .map_err(db_err)?;
            }

            if commit.doc_info.is_removed() {
                let index = doc_key_index(&doc_ref.project_id, &commit.doc_info.key);
                let indexed = keys
                    .get(index.as_slice())
                    .map_err(db_err)?
                    .map(|v| v.value().to_vec());
                if indexed.as_deref() == Some(commit.doc_info.id.as_bytes().as_slice()) {
                    keys.remove(index.as_slice()).map_err(db_err)?;
                }
            }

            docs.insert(
                doc_key(&doc_ref).as_slice(),
                encode(&commit.doc_info)?.as_slice(),
            )
            .map_err(db_err)?;
            clients
                .insert(client_ref.as_slice(), encode(&client_info)?.as_slice())
                .map_err(db_err)?;
            client_info
        };
        write_txn.commit().map_err(db_err)?;

        trace!(doc = %doc_ref, "Committed push-pull");
        Ok(client_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{
        ActorId, ChangeId, Checkpoint, ClientDocInfo, DocumentState, DocumentStatus, Operation,
    };
    use tempfile::TempDir;

    fn create_test_db() -> (RedbDatabase, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbConfig::default().with_path(temp_dir.path().join("test.redb"));
        let db = RedbDatabase::open(config).unwrap();
        (db, temp_dir)
    }

    fn change(actor: ActorId, client_seq: u32, server_seq: u64) -> Change {
        Change::new(
            ChangeId::new(client_seq, client_seq as u64, actor).with_server_seq(server_seq),
            Some(format!("change {client_seq}")),
            vec![Operation::set("title", format!("v{client_seq}").into_bytes())],
            None,
        )
    }

    fn attached(server_seq: u64, client_seq: u32) -> ClientDocInfo {
        ClientDocInfo {
            status: DocumentStatus::Attached,
            server_seq,
            client_seq,
        }
    }

    async fn commit_changes(db: &RedbDatabase, client: &ClientInfo, doc: &DocInfo, count: u32) -> DocInfo {
        let mut next = doc.clone();
        let changes = (1..=count)
            .map(|cs| change(client.actor_id(), cs, next.next_server_seq()))
            .collect();
        db.commit_push_pull(PushPullCommit {
            base_server_seq: doc.server_seq,
            changes,
            doc_info: next.clone(),
            client: client.ref_key(),
            client_doc: attached(next.server_seq, count),
        })
        .await
        .unwrap();
        next
    }

    #[tokio::test]
    async fn test_client_roundtrip() {
        let (db, _temp) = create_test_db();
        let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();

        let found = db.find_client_info_by_ref_key(&client.ref_key()).await.unwrap();
        assert_eq!(found, Some(client.clone()));

        let deactivated = db.deactivate_client(&client.ref_key()).await.unwrap();
        assert!(!deactivated.is_active());
        let found = db.find_client_info_by_ref_key(&client.ref_key()).await.unwrap();
        assert_eq!(found, Some(deactivated));
    }

    #[tokio::test]
    async fn test_commit_and_range_scan() {
        let (db, _temp) = create_test_db();
        let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();
        let doc = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("notes").unwrap())
            .await
            .unwrap();

        let doc = commit_changes(&db, &client, &doc, 5).await;
        assert_eq!(doc.server_seq, 5);

        let changes = db
            .find_changes_between_server_seqs(&doc.ref_key(), 2, 4)
            .await
            .unwrap();
        assert_eq!(
            changes.iter().map(Change::server_seq).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        // another document's history is not in range
        let other = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("other").unwrap())
            .await
            .unwrap();
        assert!(db
            .find_changes_between_server_seqs(&other.ref_key(), 1, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stale_commit_rolls_back() {
        let (db, _temp) = create_test_db();
        let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();
        let doc = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("notes").unwrap())
            .await
            .unwrap();
        commit_changes(&db, &client, &doc, 2).await;

        let mut next = doc.clone();
        let seq = next.next_server_seq();
        let err = db
            .commit_push_pull(PushPullCommit {
                base_server_seq: 0,
                changes: vec![change(client.actor_id(), 9, seq)],
                doc_info: next,
                client: client.ref_key(),
                client_doc: attached(seq, 9),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let stored = db.find_doc_info_by_ref_key(&doc.ref_key()).await.unwrap().unwrap();
        assert_eq!(stored.server_seq, 2);
        let history = db
            .find_changes_between_server_seqs(&doc.ref_key(), 1, 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].client_seq(), 1);
    }

    #[tokio::test]
    async fn test_commits_on_two_documents_keep_both_entries() {
        let (db, _temp) = create_test_db();
        let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();
        let notes = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("notes").unwrap())
            .await
            .unwrap();
        let todo = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("todo").unwrap())
            .await
            .unwrap();

        commit_changes(&db, &client, &notes, 2).await;
        commit_changes(&db, &client, &todo, 3).await;

        let stored = db
            .find_client_info_by_ref_key(&client.ref_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.checkpoint(&notes.id), Checkpoint::new(2, 2));
        assert_eq!(stored.checkpoint(&todo.id), Checkpoint::new(3, 3));
    }

    #[tokio::test]
    async fn test_commit_for_deactivated_client_is_rejected() {
        let (db, _temp) = create_test_db();
        let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();
        let doc = db
            .find_or_create_doc_info(&client.ref_key(), &DocKey::new("notes").unwrap())
            .await
            .unwrap();
        db.deactivate_client(&client.ref_key()).await.unwrap();

        let mut next = doc.clone();
        let seq = next.next_server_seq();
        let err = db
            .commit_push_pull(PushPullCommit {
                base_server_seq: 0,
                changes: vec![change(client.actor_id(), 1, seq)],
                doc_info: next,
                client: client.ref_key(),
                client_doc: attached(seq, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ClientDeactivated(_)));
        assert!(db
            .find_changes_between_server_seqs(&doc.ref_key(), 1, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_closest_snapshot() {
        let (db, _temp) = create_test_db();
        let project = ProjectId::generate();
        let doc = DocRefKey::new(project, DocId::generate());

        for seq in [100, 200, 300] {
            db.store_snapshot(&doc, &Snapshot::new(doc.doc_id, seq, seq, DocumentState::new()))
                .await
                .unwrap();
        }

        let closest = db.find_closest_snapshot(&doc, 250).await.unwrap();
        assert_eq!(closest.map(|s| s.server_seq), Some(200));
        assert!(db.find_closest_snapshot(&doc, 99).await.unwrap().is_none());
        let exact = db.find_closest_snapshot(&doc, 300).await.unwrap();
        assert_eq!(exact.map(|s| s.server_seq), Some(300));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbConfig::default().with_path(temp_dir.path().join("reopen.redb"));

        let (client, doc) = {
            let db = RedbDatabase::open(config.clone()).unwrap();
            let client = db.activate_client(ProjectId::generate(), "alice").await.unwrap();
            let doc = db
                .find_or_create_doc_info(&client.ref_key(), &DocKey::new("notes").unwrap())
                .await
                .unwrap();
            let doc = commit_changes(&db, &client, &doc, 3).await;
            (client, doc)
        };

        let db = RedbDatabase::open(config).unwrap();
        assert!(db.find_client_info_by_ref_key(&client.ref_key()).await.unwrap().is_some());
        let found = db
            .find_doc_info_by_key(&doc.project_id, &doc.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, doc.id);
        assert_eq!(found.server_seq, 3);
    }
}
