//! Document service
//!
//! Client-facing lifecycle of a document: attach, regular sync traffic,
//! remove. Every operation parses the client id first, then runs under the
//! document's push-pull lock.

use tracing::{Instrument, info, info_span};

use quill_core::{ActorId, OpContext, Project, SyncMode};
use quill_logging::spans;
use quill_sync::PushPullOptions;

use crate::backend::Backend;
use crate::error::NodeResult;
use crate::messages::{
    AttachDocumentRequest, AttachDocumentResponse, PushPullChangesRequest,
    PushPullChangesResponse, RemoveDocumentRequest, RemoveDocumentResponse,
};

/// Attach, sync and remove documents
#[derive(Clone)]
pub struct DocumentService {
    backend: Backend,
}

impl DocumentService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Attach a client to the document named by the pack's key
    ///
    /// The document is created on first use. Re-attaching after a detach
    /// keeps the client's stored checkpoint, so only missing changes are
    /// returned.
    pub async fn attach_document(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: AttachDocumentRequest,
    ) -> NodeResult<AttachDocumentResponse> {
        let actor = ActorId::from_hex(&request.client_id)?;
        let pack = request.change_pack;
        let doc_key = pack.doc_key.clone();

        let span = info_span!(
            spans::ATTACH_DOCUMENT,
            project = %project.id,
            actor = %actor.short(),
            doc_key = %doc_key,
        );
        async move {
            self.backend
                .with_document_lock(ctx, &project.id, &doc_key, || async {
                    let directory = self.backend.directory();
                    let mut client_info = directory
                        .find_active_client_info(&project.id, actor.into())
                        .await?;
                    let doc_info = directory.find_or_create_doc_info(&client_info, &doc_key).await?;
                    client_info.attach_document(doc_info.id)?;

                    let result = self
                        .backend
                        .engine()
                        .push_pull(
                            &project.id,
                            &client_info,
                            &doc_info,
                            pack,
                            PushPullOptions::sync(SyncMode::PushPull),
                        )
                        .await?;
                    info!(doc_id = %doc_info.id, checkpoint = %result.checkpoint(), "Document attached");

                    Ok(AttachDocumentResponse {
                        doc_id: doc_info.id,
                        change_pack: result.response,
                    })
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// Push local changes and pull what the client is missing
    pub async fn push_pull_changes(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: PushPullChangesRequest,
    ) -> NodeResult<PushPullChangesResponse> {
        let actor = ActorId::from_hex(&request.client_id)?;
        let PushPullChangesRequest {
            doc_id,
            change_pack: pack,
            mode,
            ..
        } = request;
        let doc_key = pack.doc_key.clone();

        let span = info_span!(
            spans::PUSH_PULL_CHANGES,
            project = %project.id,
            actor = %actor.short(),
            doc_key = %doc_key,
            mode = ?mode,
        );
        async move {
            self.backend
                .with_document_lock(ctx, &project.id, &doc_key, || async {
                    let directory = self.backend.directory();
                    let client_info = directory
                        .find_active_client_info(&project.id, actor.into())
                        .await?;
                    let doc_info = directory
                        .find_doc_info_by_ref_key(&project.id, doc_id)
                        .await?;

                    let result = self
                        .backend
                        .engine()
                        .push_pull(
                            &project.id,
                            &client_info,
                            &doc_info,
                            pack,
                            PushPullOptions::sync(mode),
                        )
                        .await?;
                    Ok(PushPullChangesResponse {
                        change_pack: result.response,
                    })
                })
                .await
        }
        .instrument(span)
        .await
    }

    /// Remove a document the client has detached
    ///
    /// Removal is terminal for every client of the document.
    pub async fn remove_document(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: RemoveDocumentRequest,
    ) -> NodeResult<RemoveDocumentResponse> {
        let actor = ActorId::from_hex(&request.client_id)?;
        let RemoveDocumentRequest {
            doc_id,
            change_pack: pack,
            ..
        } = request;
        let doc_key = pack.doc_key.clone();

        let span = info_span!(
            spans::REMOVE_DOCUMENT,
            project = %project.id,
            actor = %actor.short(),
            doc_key = %doc_key,
        );
        async move {
            self.backend
                .with_document_lock(ctx, &project.id, &doc_key, || async {
                    let directory = self.backend.directory();
                    let client_info = directory
                        .find_active_client_info(&project.id, actor.into())
                        .await?;
                    let doc_info = directory
                        .find_doc_info_by_ref_key(&project.id, doc_id)
                        .await?;

                    let result = self
                        .backend
                        .engine()
                        .push_pull(
                            &project.id,
                            &client_info,
                            &doc_info,
                            pack,
                            PushPullOptions::remove(),
                        )
                        .await?;
                    info!(doc_id = %doc_info.id, "Document removed");
                    Ok(RemoveDocumentResponse {
                        change_pack: result.response,
                    })
                })
                .await
        }
        .instrument(span)
        .await
    }
}
