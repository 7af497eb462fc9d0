//! Client and document lookups
//!
//! Thin layer over [`Database`] that turns missing or inactive records
//! into the sync error taxonomy.

use std::sync::Arc;

use tracing::{debug, instrument};

use quill_core::{ClientId, ClientInfo, ClientRefKey, DocId, DocInfo, DocKey, DocRefKey, ProjectId};
use quill_storage::{Database, StorageError};

use crate::error::{SyncError, SyncResult};

/// Authoritative record lookups
#[derive(Clone)]
pub struct Directory {
    db: Arc<dyn Database>,
}

impl Directory {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Store a fresh activated client
    pub async fn activate_client(&self, project_id: ProjectId, key: &str) -> SyncResult<ClientInfo> {
        Ok(self.db.activate_client(project_id, key).await?)
    }

    /// Client record, which must exist and be activated
    #[instrument(skip_all, fields(project = %project_id, client = %client_id))]
    pub async fn find_active_client_info(
        &self,
        project_id: &ProjectId,
        client_id: ClientId,
    ) -> SyncResult<ClientInfo> {
        let key = ClientRefKey::new(*project_id, client_id);
        let info = self
            .db
            .find_client_info_by_ref_key(&key)
            .await?
            .ok_or_else(|| SyncError::ClientNotFound(key.to_string()))?;

        if !info.is_active() {
            debug!(status = %info.status, "Client is not active");
            return Err(SyncError::ClientNotActive(key.to_string()));
        }
        Ok(info)
    }

    pub async fn find_doc_info_by_ref_key(
        &self,
        project_id: &ProjectId,
        doc_id: DocId,
    ) -> SyncResult<DocInfo> {
        let key = DocRefKey::new(*project_id, doc_id);
        self.db
            .find_doc_info_by_ref_key(&key)
            .await?
            .ok_or_else(|| SyncError::DocumentNotFound(key.to_string()))
    }

    pub async fn find_doc_info_by_key(
        &self,
        project_id: &ProjectId,
        key: &DocKey,
    ) -> SyncResult<DocInfo> {
        self.db
            .find_doc_info_by_key(project_id, key)
            .await?
            .ok_or_else(|| SyncError::DocumentNotFound(format!("{}/{}", project_id, key)))
    }

    /// Live document for `key`, created with `client` as owner if missing
    pub async fn find_or_create_doc_info(
        &self,
        client: &ClientInfo,
        key: &DocKey,
    ) -> SyncResult<DocInfo> {
        Ok(self.db.find_or_create_doc_info(&client.ref_key(), key).await?)
    }

    /// Mark a client deactivated, keeping its document entries
    pub async fn deactivate_client(
        &self,
        project_id: &ProjectId,
        client_id: ClientId,
    ) -> SyncResult<ClientInfo> {
        let key = ClientRefKey::new(*project_id, client_id);
        match self.db.deactivate_client(&key).await {
            Err(StorageError::NotFound(_)) => Err(SyncError::ClientNotFound(key.to_string())),
            other => Ok(other?),
        }
    }
}
