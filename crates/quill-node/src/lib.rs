//! # Quill Node
//!
//! Service surface of a Quill sync node.
//!
//! [`QuillNode`] ties together:
//! - Coordinator (per-document push-pull locks, in-process or lease based)
//! - Storage (in-memory or redb)
//! - Sync engine (directory lookups, snapshot builder, push-pull)
//!
//! Every operation validates its client id before asking for a lock, then
//! runs its lookups, snapshot build and push-pull commit while holding the
//! document lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quill_node::{QuillNode, NodeConfig};
//! use quill_node::messages::DetachDocumentRequest;
//!
//! let node = QuillNode::new(NodeConfig::default())?;
//! node.cluster()
//!     .detach_document(&ctx, &project, DetachDocumentRequest { client_id, document })
//!     .await?;
//! ```

mod backend;
mod clients;
mod cluster;
mod config;
mod documents;
mod error;
pub mod messages;

pub use backend::Backend;
pub use clients::ClientService;
pub use cluster::ClusterService;
pub use config::{LockConfig, NodeConfig, StorageBackend};
pub use documents::DocumentService;
pub use error::{ErrorCode, NodeError, NodeResult};

use std::sync::Arc;

use quill_coordinator::{Coordinator, LeaseStore};
use quill_core::{OpContext, Project};
use quill_logging::{QuillSubscriberBuilder, WorkerGuard};
use quill_storage::Database;

use messages::{NodeRequest, NodeResponse};

/// A sync node: the three services over one shared backend
#[derive(Clone)]
pub struct QuillNode {
    backend: Backend,
    clients: ClientService,
    documents: DocumentService,
    cluster: ClusterService,
}

impl QuillNode {
    /// Single-node deployment
    pub fn new(config: NodeConfig) -> NodeResult<Self> {
        Ok(Self::from_backend(Backend::new(config)?))
    }

    /// Cluster member locking through `store`
    pub fn with_lease_store<S: LeaseStore + 'static>(
        config: NodeConfig,
        store: Arc<S>,
    ) -> NodeResult<Self> {
        Ok(Self::from_backend(Backend::with_lease_store(config, store)?))
    }

    pub fn with_parts(
        config: NodeConfig,
        coordinator: Arc<dyn Coordinator>,
        database: Arc<dyn Database>,
    ) -> Self {
        Self::from_backend(Backend::with_parts(config, coordinator, database))
    }

    pub fn from_backend(backend: Backend) -> Self {
        let cluster = ClusterService::new(backend.clone());
        Self {
            clients: ClientService::new(backend.clone(), cluster.clone()),
            documents: DocumentService::new(backend.clone()),
            cluster,
            backend,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn clients(&self) -> &ClientService {
        &self.clients
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn cluster(&self) -> &ClusterService {
        &self.cluster
    }

    /// Dispatch a decoded request to its service
    pub async fn handle(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: NodeRequest,
    ) -> NodeResult<NodeResponse> {
        Ok(match request {
            NodeRequest::ActivateClient(req) => {
                NodeResponse::ActivateClient(self.clients.activate_client(project, req).await?)
            }
            NodeRequest::DeactivateClient(req) => {
                self.clients.deactivate_client(ctx, project, req).await?;
                NodeResponse::DeactivateClient
            }
            NodeRequest::AttachDocument(req) => {
                NodeResponse::AttachDocument(self.documents.attach_document(ctx, project, req).await?)
            }
            NodeRequest::PushPullChanges(req) => NodeResponse::PushPullChanges(
                self.documents.push_pull_changes(ctx, project, req).await?,
            ),
            NodeRequest::DetachDocument(req) => {
                NodeResponse::DetachDocument(self.cluster.detach_document(ctx, project, req).await?)
            }
            NodeRequest::RemoveDocument(req) => {
                NodeResponse::RemoveDocument(self.documents.remove_document(ctx, project, req).await?)
            }
        })
    }
}

/// Install the log subscriber described by `config.log`
///
/// Keep the returned guard alive for as long as file output is wanted.
pub fn init_logging(config: &NodeConfig) -> Option<WorkerGuard> {
    QuillSubscriberBuilder::new().with_config(config.log.clone()).init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::ProjectId;
    use messages::ActivateClientRequest;

    #[tokio::test]
    async fn test_handle_encoded_request() {
        let node = QuillNode::new(NodeConfig::default()).unwrap();
        let project = Project::new(ProjectId::generate(), "demo");

        let bytes = NodeRequest::ActivateClient(ActivateClientRequest {
            client_key: "phone".to_string(),
        })
        .to_bytes()
        .unwrap();
        let request = NodeRequest::from_bytes(&bytes).unwrap();

        let response = node
            .handle(&OpContext::background(), &project, request)
            .await
            .unwrap();
        let decoded = NodeResponse::from_bytes(&response.to_bytes().unwrap()).unwrap();
        match decoded {
            NodeResponse::ActivateClient(activated) => assert_eq!(activated.client_id.len(), 24),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
