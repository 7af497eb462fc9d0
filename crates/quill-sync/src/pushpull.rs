//! Push-pull reconciliation
//!
//! [`PushPullEngine::push_pull`] merges a client's change pack into the
//! stored history, computes what the client is missing, advances the
//! client's checkpoint and applies the requested lifecycle transition.
//! All writes go through a single [`Database::commit_push_pull`] call.
//!
//! The caller must hold the document lock for the whole call.

use std::sync::Arc;

use chrono::Utc;
use tracing::{Instrument, debug, field, info, info_span, warn};

use quill_core::{
    Change, ChangePack, ChangePackError, Checkpoint, ClientDocInfo, ClientInfo, DocInfo,
    DocumentStatus, ProjectId, StatusError, SyncMode,
};
use quill_logging::{fields, spans};
use quill_storage::{Database, PushPullCommit};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::SnapshotBuilder;

/// What a push-pull should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPullOptions {
    pub mode: SyncMode,
    /// Lifecycle status the client's document moves to on commit
    pub status: DocumentStatus,
}

impl PushPullOptions {
    pub fn new(mode: SyncMode, status: DocumentStatus) -> Self {
        Self { mode, status }
    }

    /// Regular sync traffic of an attached client
    pub fn sync(mode: SyncMode) -> Self {
        Self::new(mode, DocumentStatus::Attached)
    }

    pub fn detach() -> Self {
        Self::new(SyncMode::PushPull, DocumentStatus::Detached)
    }

    pub fn remove() -> Self {
        Self::new(SyncMode::PushPull, DocumentStatus::Removed)
    }
}

impl Default for PushPullOptions {
    fn default() -> Self {
        Self::sync(SyncMode::PushPull)
    }
}

/// Outcome of a committed push-pull
#[derive(Debug, Clone)]
pub struct PushPullResult {
    /// Pack returned to the client: pulled changes or a state snapshot
    pub response: ChangePack,
    /// Client record as stored after the commit, including entries other
    /// documents wrote concurrently
    pub client_info: ClientInfo,
    /// Document record as committed
    pub doc_info: DocInfo,
    /// Number of changes newly persisted
    pub pushed: usize,
    /// Number of changes the client was missing
    pub pulled: usize,
}

impl PushPullResult {
    pub fn checkpoint(&self) -> Checkpoint {
        self.response.checkpoint
    }
}

/// The reconciliation engine
#[derive(Clone)]
pub struct PushPullEngine {
    db: Arc<dyn Database>,
    snapshots: SnapshotBuilder,
}

impl PushPullEngine {
    pub fn new(db: Arc<dyn Database>, snapshots: SnapshotBuilder) -> Self {
        Self { db, snapshots }
    }

    pub fn snapshots(&self) -> &SnapshotBuilder {
        &self.snapshots
    }

    /// Reconcile `pack` against the stored state of `doc_info`
    ///
    /// Changes the server already holds are skipped, so retrying the same
    /// pack is harmless. Nothing is written unless every step succeeds.
    pub async fn push_pull(
        &self,
        project_id: &ProjectId,
        client_info: &ClientInfo,
        doc_info: &DocInfo,
        pack: ChangePack,
        options: PushPullOptions,
    ) -> SyncResult<PushPullResult> {
        let span = info_span!(
            spans::PUSH_PULL,
            doc_key = %doc_info.key,
            actor = %client_info.actor_id().short(),
            mode = ?options.mode,
            status = %options.status,
            checkpoint = %pack.checkpoint,
            pushed = field::Empty,
            pulled = field::Empty,
            server_seq = field::Empty,
        );

        async move {
            let result = self
                .reconcile(project_id, client_info, doc_info, pack, options)
                .await?;

            let span = tracing::Span::current();
            span.record(fields::PUSHED, result.pushed);
            span.record(fields::PULLED, result.pulled);
            span.record(fields::SERVER_SEQ, result.doc_info.server_seq);
            info!(checkpoint = %result.checkpoint(), "Push-pull committed");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    async fn reconcile(
        &self,
        project_id: &ProjectId,
        client_info: &ClientInfo,
        doc_info: &DocInfo,
        pack: ChangePack,
        options: PushPullOptions,
    ) -> SyncResult<PushPullResult> {
        if doc_info.project_id != *project_id || pack.doc_key != doc_info.key {
            return Err(SyncError::DocumentNotFound(format!(
                "{}/{}",
                project_id, pack.doc_key
            )));
        }
        if client_info.project_id != *project_id {
            return Err(SyncError::ClientNotFound(client_info.ref_key().to_string()));
        }
        if doc_info.is_removed() {
            return Err(StatusError::DocumentRemoved(doc_info.key.to_string()).into());
        }

        let doc_id = doc_info.id;
        let current = client_info
            .document_status(&doc_id)
            .ok_or_else(|| SyncError::ClientNotAttached {
                client: client_info.id.to_string(),
                doc: doc_info.key.to_string(),
            })?;
        let next_status = current.transition(options.status)?;

        self.validate_pack(client_info, doc_info, &pack)?;
        let stored = client_info.checkpoint(&doc_id);

        let mut doc_info = doc_info.clone();
        let base_server_seq = doc_info.server_seq;

        // Push
        let mut pushed_changes: Vec<Change> = Vec::new();
        let mut client_seq = stored.client_seq;
        if options.mode.includes_push() {
            let fresh: Vec<&Change> = pack
                .changes
                .iter()
                .filter(|c| c.client_seq() > stored.client_seq)
                .collect();
            if !fresh.is_empty() && pack.checkpoint.server_seq < stored.server_seq {
                return Err(SyncError::StaleChangePack {
                    pack: pack.checkpoint,
                    stored,
                });
            }
            if pack.changes.len() > fresh.len() {
                debug!(
                    skipped = pack.changes.len() - fresh.len(),
                    "Skipping changes the server already holds"
                );
            }
            for change in fresh {
                let server_seq = doc_info.next_server_seq();
                client_seq = client_seq.max(change.client_seq());
                pushed_changes.push(change.with_server_seq(server_seq));
            }
        }

        // Pull
        let mut pulled_changes = Vec::new();
        if options.mode.includes_pull() && pack.checkpoint.server_seq < base_server_seq {
            pulled_changes = self
                .db
                .find_changes_between_server_seqs(
                    &doc_info.ref_key(),
                    pack.checkpoint.server_seq + 1,
                    base_server_seq,
                )
                .await?;
            let actor = client_info.actor_id();
            pulled_changes.retain(|c| c.actor() != actor);
        }

        // A push-only client has not seen the changes in between
        let seen_server_seq = if options.mode.includes_pull() {
            doc_info.server_seq
        } else {
            stored.server_seq
        };
        let checkpoint = stored.forward(Checkpoint::new(seen_server_seq, client_seq));
        let client_doc = ClientDocInfo {
            status: next_status,
            server_seq: checkpoint.server_seq,
            client_seq: checkpoint.client_seq,
        };

        let now = Utc::now();
        doc_info.accessed_at = now;
        if !pushed_changes.is_empty() {
            doc_info.updated_at = now;
        }
        if options.status == DocumentStatus::Removed {
            doc_info.mark_removed(now);
        }

        let pushed = pushed_changes.len();
        let client_info = self
            .db
            .commit_push_pull(PushPullCommit {
                base_server_seq,
                changes: pushed_changes,
                doc_info: doc_info.clone(),
                client: client_info.ref_key(),
                client_doc,
            })
            .await?;
        let checkpoint = client_info.checkpoint(&doc_id);

        if pushed > 0 {
            self.snapshots
                .store_snapshot_if_needed(&doc_info, base_server_seq)
                .await;
        }

        let pulled = pulled_changes.len();
        let mut response = ChangePack::new(doc_info.key.clone(), checkpoint, pulled_changes);
        response.is_removed = doc_info.is_removed();
        self.attach_snapshot(&doc_info, &mut response).await;

        Ok(PushPullResult {
            response,
            client_info,
            doc_info,
            pushed,
            pulled,
        })
    }

    fn validate_pack(
        &self,
        client_info: &ClientInfo,
        doc_info: &DocInfo,
        pack: &ChangePack,
    ) -> SyncResult<()> {
        pack.validate()?;

        if let Some(first) = pack.changes.first() {
            if first.actor() != client_info.actor_id() {
                return Err(ChangePackError::ForeignActor(first.actor().to_string()).into());
            }
        }

        let stored = client_info.checkpoint(&doc_info.id);
        if pack.checkpoint.client_seq > stored.client_seq {
            return Err(ChangePackError::AheadOfServer(format!(
                "client_seq {} > stored {}",
                pack.checkpoint.client_seq, stored.client_seq
            ))
            .into());
        }
        if pack.checkpoint.server_seq > doc_info.server_seq {
            return Err(ChangePackError::AheadOfServer(format!(
                "server_seq {} > document {}",
                pack.checkpoint.server_seq, doc_info.server_seq
            ))
            .into());
        }
        Ok(())
    }

    /// Replace a large pull with the encoded state at the new server_seq
    ///
    /// The commit has already happened, so a failure here falls back to
    /// sending the changes.
    async fn attach_snapshot(&self, doc_info: &DocInfo, response: &mut ChangePack) {
        let threshold = self.snapshots.config().threshold;
        if threshold == 0 || (response.changes.len() as u64) < threshold {
            return;
        }

        match self
            .snapshots
            .encode_state_at(&doc_info.ref_key(), doc_info.server_seq)
            .await
        {
            Ok((bytes, lamport)) => {
                debug!(
                    replaced = response.changes.len(),
                    bytes = bytes.len(),
                    lamport,
                    "Answering pull with a snapshot"
                );
                response.changes.clear();
                response.snapshot = Some(bytes);
                response.snapshot_lamport = lamport;
            }
            Err(e) => warn!(error = %e, "Failed to encode snapshot response, sending changes"),
        }
    }
}
