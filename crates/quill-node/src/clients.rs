//! Client service

use tracing::{Instrument, debug, info, info_span, warn};

use quill_core::{ActorId, OpContext, Project};
use quill_logging::spans;

use crate::backend::Backend;
use crate::cluster::ClusterService;
use crate::error::NodeResult;
use crate::messages::{ActivateClientRequest, ActivateClientResponse, DeactivateClientRequest};

/// Client session lifecycle
#[derive(Clone)]
pub struct ClientService {
    backend: Backend,
    cluster: ClusterService,
}

impl ClientService {
    pub fn new(backend: Backend, cluster: ClusterService) -> Self {
        Self { backend, cluster }
    }

    /// Start a session with a fresh actor id
    pub async fn activate_client(
        &self,
        project: &Project,
        request: ActivateClientRequest,
    ) -> NodeResult<ActivateClientResponse> {
        let span = info_span!(spans::ACTIVATE_CLIENT, project = %project.id, key = %request.client_key);
        async move {
            let client_info = self
                .backend
                .directory()
                .activate_client(project.id, &request.client_key)
                .await?;
            let actor = client_info.actor_id();
            info!(actor = %actor.short(), "Client activated");
            Ok(ActivateClientResponse {
                client_id: actor.to_hex(),
            })
        }
        .instrument(span)
        .await
    }

    /// End a session
    ///
    /// Each attached document is detached under its own lock through the
    /// same path as a DetachDocument call. The first failure stops the
    /// deactivation and leaves the client active; documents detached so far
    /// stay detached. Only the client status is written at the end, so a
    /// push-pull committing on another document meanwhile is not undone,
    /// and any later commit for this client is refused.
    pub async fn deactivate_client(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: DeactivateClientRequest,
    ) -> NodeResult<()> {
        let actor = ActorId::from_hex(&request.client_id)?;

        let span = info_span!(spans::DEACTIVATE_CLIENT, project = %project.id, actor = %actor.short());
        async move {
            let directory = self.backend.directory();
            let client_info = directory
                .find_active_client_info(&project.id, actor.into())
                .await?;

            for doc_id in client_info.attached_documents() {
                let doc_info = directory.find_doc_info_by_ref_key(&project.id, doc_id).await?;
                if doc_info.is_removed() {
                    warn!(doc_key = %doc_info.key, "Skipping removed document");
                    continue;
                }
                self.cluster
                    .detach_with_lock(ctx, project, actor, &doc_info.summary())
                    .await?;
                debug!(doc_key = %doc_info.key, "Detached for deactivation");
            }

            let client_info = directory.deactivate_client(&project.id, actor.into()).await?;
            info!(documents = client_info.documents.len(), "Client deactivated");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
