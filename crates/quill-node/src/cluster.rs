//! Cluster service
//!
//! Operations one node performs on behalf of another, or of itself, on a
//! document it may not have attached locally.

use tracing::{Instrument, info, info_span};

use quill_core::{ActorId, DocumentSummary, OpContext, Project};
use quill_logging::spans;
use quill_sync::{PushPullOptions, PushPullResult, SyncError};

use crate::backend::Backend;
use crate::error::NodeResult;
use crate::messages::{DetachDocumentRequest, DetachDocumentResponse};

/// Cluster-internal document operations
#[derive(Clone)]
pub struct ClusterService {
    backend: Backend,
}

impl ClusterService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Detach a client from a document, clearing its presence
    ///
    /// The client id is parsed before the document lock is requested, so a
    /// malformed id never touches the coordinator. Everything after the
    /// lock runs as one push-pull commit: on failure nothing changes.
    pub async fn detach_document(
        &self,
        ctx: &OpContext,
        project: &Project,
        request: DetachDocumentRequest,
    ) -> NodeResult<DetachDocumentResponse> {
        let actor = ActorId::from_hex(&request.client_id)?;
        let summary = request.document;

        let span = info_span!(
            spans::DETACH_DOCUMENT,
            project = %project.id,
            actor = %actor.short(),
            doc_key = %summary.key,
        );
        async move {
            let result = self.detach_with_lock(ctx, project, actor, &summary).await?;
            info!(checkpoint = %result.checkpoint(), "Document detached");
            Ok(DetachDocumentResponse)
        }
        .instrument(span)
        .await
    }

    /// Lock the document named by `summary` and detach `actor` from it
    pub(crate) async fn detach_with_lock(
        &self,
        ctx: &OpContext,
        project: &Project,
        actor: ActorId,
        summary: &DocumentSummary,
    ) -> NodeResult<PushPullResult> {
        self.backend
            .with_document_lock(ctx, &project.id, &summary.key, || {
                self.detach_locked(project, actor, summary)
            })
            .await
    }

    async fn detach_locked(
        &self,
        project: &Project,
        actor: ActorId,
        summary: &DocumentSummary,
    ) -> NodeResult<PushPullResult> {
        let directory = self.backend.directory();
        let engine = self.backend.engine();

        let client_info = directory
            .find_active_client_info(&project.id, actor.into())
            .await?;
        let doc_info = directory
            .find_doc_info_by_ref_key(&project.id, summary.id)
            .await?;
        // The lock is named after the summary's key
        if doc_info.key != summary.key {
            return Err(SyncError::DocumentNotFound(format!("{}/{}", project.id, summary.key)).into());
        }

        let checkpoint = client_info.checkpoint(&doc_info.id);
        let mut doc = engine
            .snapshots()
            .build_doc_for_checkpoint(&doc_info, checkpoint, actor)
            .await?;
        doc.update(None, |change| change.clear_presence());

        let result = engine
            .push_pull(
                &project.id,
                &client_info,
                &doc_info,
                doc.create_change_pack(),
                PushPullOptions::detach(),
            )
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{DocKey, DocumentStatus, IdentityError, Presence, ProjectId};
    use quill_sync::Document;

    use crate::config::NodeConfig;
    use crate::error::NodeError;

    struct Fixture {
        backend: Backend,
        cluster: ClusterService,
        project: Project,
    }

    fn fixture() -> Fixture {
        let backend = Backend::new(NodeConfig::default()).unwrap();
        Fixture {
            cluster: ClusterService::new(backend.clone()),
            backend,
            project: Project::new(ProjectId::generate(), "demo"),
        }
    }

    #[tokio::test]
    async fn test_detach_clears_presence_and_status() {
        let f = fixture();
        let directory = f.backend.directory();
        let mut client = directory.activate_client(f.project.id, "alice").await.unwrap();
        let key = DocKey::new("notes").unwrap();
        let doc_info = directory.find_or_create_doc_info(&client, &key).await.unwrap();
        client.attach_document(doc_info.id).unwrap();

        let actor = client.actor_id();
        let mut doc = Document::new(key.clone(), actor);
        doc.update(None, |change| {
            change.set("title", "hello");
            let mut presence = Presence::new();
            presence.set("cursor", "3");
            change.set_presence(presence);
        });
        let result = f
            .backend
            .engine()
            .push_pull(
                &f.project.id,
                &client,
                &doc_info,
                doc.create_change_pack(),
                PushPullOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.doc_info.server_seq, 1);

        let request = DetachDocumentRequest {
            client_id: actor.to_hex(),
            document: result.doc_info.summary(),
        };
        f.cluster
            .detach_document(&OpContext::background(), &f.project, request)
            .await
            .unwrap();

        let client = directory
            .find_active_client_info(&f.project.id, client.id)
            .await
            .unwrap();
        assert_eq!(
            client.document_status(&doc_info.id),
            Some(DocumentStatus::Detached)
        );

        let doc_info = directory
            .find_doc_info_by_ref_key(&f.project.id, doc_info.id)
            .await
            .unwrap();
        let rebuilt = f
            .backend
            .engine()
            .snapshots()
            .build_doc_for_checkpoint(&doc_info, client.checkpoint(&doc_info.id), actor)
            .await
            .unwrap();
        assert!(rebuilt.state().presence(&actor).is_none());
        assert_eq!(rebuilt.state().get("title"), Some(b"hello".as_slice()));
    }

    #[tokio::test]
    async fn test_malformed_client_id() {
        let f = fixture();
        let client = f
            .backend
            .directory()
            .activate_client(f.project.id, "alice")
            .await
            .unwrap();
        let doc_info = f
            .backend
            .directory()
            .find_or_create_doc_info(&client, &DocKey::new("notes").unwrap())
            .await
            .unwrap();

        let request = DetachDocumentRequest {
            client_id: "not-hex".to_string(),
            document: doc_info.summary(),
        };
        let err = f
            .cluster
            .detach_document(&OpContext::background(), &f.project, request)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidArgument(IdentityError::InvalidActorId(_))
        ));
        assert_eq!(f.backend.coordinator().stats().acquired, 0);
    }

    #[tokio::test]
    async fn test_summary_key_must_match_document() {
        let f = fixture();
        let directory = f.backend.directory();
        let client = directory.activate_client(f.project.id, "alice").await.unwrap();
        let doc_info = directory
            .find_or_create_doc_info(&client, &DocKey::new("notes").unwrap())
            .await
            .unwrap();

        let mut summary = doc_info.summary();
        summary.key = DocKey::new("todo").unwrap();
        let request = DetachDocumentRequest {
            client_id: client.actor_id().to_hex(),
            document: summary,
        };
        let err = f
            .cluster
            .detach_document(&OpContext::background(), &f.project, request)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Sync(SyncError::DocumentNotFound(_))));
    }
}
