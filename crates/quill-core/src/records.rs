//! Directory records for projects, clients and documents
//!
//! These records are owned by the storage collaborator. A client record is
//! shared by every document the client touches, so a push-pull only ever
//! writes back its own document's [`ClientDocInfo`] entry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::StatusError;
use crate::ids::{ActorId, ClientId, ClientRefKey, DocId, DocKey, DocRefKey, ProjectId};
use crate::status::{ClientStatus, DocumentStatus};

/// Tenant that scopes documents and clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Per-document state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDocInfo {
    pub status: DocumentStatus,
    pub server_seq: u64,
    pub client_seq: u32,
}

impl ClientDocInfo {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.server_seq, self.client_seq)
    }
}

/// Record of a connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub project_id: ProjectId,
    pub key: String,
    pub status: ClientStatus,
    pub documents: BTreeMap<DocId, ClientDocInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientInfo {
    /// Create an activated client with a freshly minted actor id
    pub fn new(project_id: ProjectId, key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ActorId::generate().into(),
            project_id,
            key: key.into(),
            status: ClientStatus::Activated,
            documents: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ref_key(&self) -> ClientRefKey {
        ClientRefKey::new(self.project_id, self.id)
    }

    pub fn actor_id(&self) -> ActorId {
        self.id.into()
    }

    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Activated
    }

    /// Last synced checkpoint for a document, `INITIAL` if never attached
    pub fn checkpoint(&self, doc_id: &DocId) -> Checkpoint {
        self.documents
            .get(doc_id)
            .map(ClientDocInfo::checkpoint)
            .unwrap_or(Checkpoint::INITIAL)
    }

    pub fn document_status(&self, doc_id: &DocId) -> Option<DocumentStatus> {
        self.documents.get(doc_id).map(|info| info.status)
    }

    pub fn is_attached(&self, doc_id: &DocId) -> bool {
        self.document_status(doc_id) == Some(DocumentStatus::Attached)
    }

    /// Documents currently attached by this client
    pub fn attached_documents(&self) -> Vec<DocId> {
        self.documents
            .iter()
            .filter(|(_, info)| info.status == DocumentStatus::Attached)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Enter the lifecycle for a document
    ///
    /// A first attach starts from the initial checkpoint; re-attaching a
    /// detached document keeps the stored checkpoint.
    pub fn attach_document(&mut self, doc_id: DocId) -> Result<(), StatusError> {
        match self.documents.get_mut(&doc_id) {
            None => {
                self.documents.insert(
                    doc_id,
                    ClientDocInfo {
                        status: DocumentStatus::Attached,
                        server_seq: 0,
                        client_seq: 0,
                    },
                );
            }
            Some(info) if info.status == DocumentStatus::Detached => {
                info.status = DocumentStatus::Attached;
            }
            Some(info) => {
                return Err(StatusError::InvalidTransition {
                    from: info.status,
                    to: DocumentStatus::Attached,
                });
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Fold one document's entry, as computed by a push-pull, into this record
    ///
    /// Entries of other documents are left alone. The checkpoint is
    /// forwarded against what is already stored here.
    pub fn merge_document(&mut self, doc_id: DocId, entry: ClientDocInfo) -> Checkpoint {
        let next = self.checkpoint(&doc_id).forward(entry.checkpoint());
        self.documents.insert(
            doc_id,
            ClientDocInfo {
                status: entry.status,
                server_seq: next.server_seq,
                client_seq: next.client_seq,
            },
        );
        self.updated_at = Utc::now();
        next
    }

    pub fn deactivate(&mut self) {
        self.status = ClientStatus::Deactivated;
        self.updated_at = Utc::now();
    }
}

/// Record of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocInfo {
    pub id: DocId,
    pub project_id: ProjectId,
    pub key: DocKey,
    /// Highest server sequence assigned to a persisted change
    pub server_seq: u64,
    pub owner: ClientId,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl DocInfo {
    pub fn new(project_id: ProjectId, key: DocKey, owner: ClientId) -> Self {
        let now = Utc::now();
        Self {
            id: DocId::generate(),
            project_id,
            key,
            server_seq: 0,
            owner,
            created_at: now,
            accessed_at: now,
            updated_at: now,
            removed_at: None,
        }
    }

    pub fn ref_key(&self) -> DocRefKey {
        DocRefKey::new(self.project_id, self.id)
    }

    /// Aggregate status: a removed document is removed for everyone
    pub fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    /// Reserve the next server sequence
    pub fn next_server_seq(&mut self) -> u64 {
        self.server_seq += 1;
        self.server_seq
    }

    pub fn mark_removed(&mut self, at: DateTime<Utc>) {
        self.removed_at = Some(at);
        self.updated_at = at;
    }

    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id,
            key: self.key.clone(),
            created_at: self.created_at,
            accessed_at: self.accessed_at,
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight description of a document, as exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocId,
    pub key: DocKey,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
