//! Snapshot building and snapshot cadence
//!
//! Materializing a document replays its change history. Periodic snapshots
//! bound that replay to the suffix after the closest snapshot at or below
//! the requested server sequence; the result is identical to a full replay.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, warn};

use quill_core::{ActorId, Checkpoint, DocInfo, DocRefKey, DocumentState, Snapshot};
use quill_logging::spans;
use quill_storage::Database;

use crate::document::Document;
use crate::error::{SyncError, SyncResult};

/// When snapshots are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// A snapshot is considered each time the server sequence crosses a
    /// multiple of this value; 0 disables snapshots
    pub interval: u64,
    /// Minimum number of changes since the latest snapshot. Pulls of at
    /// least this many changes are answered with a snapshot instead.
    pub threshold: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: 1000,
            threshold: 500,
        }
    }
}

impl SnapshotConfig {
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// Replays stored history into document state
#[derive(Clone)]
pub struct SnapshotBuilder {
    db: Arc<dyn Database>,
    config: SnapshotConfig,
}

impl SnapshotBuilder {
    pub fn new(db: Arc<dyn Database>, config: SnapshotConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Materialize the document as `actor` last saw it at `checkpoint`
    ///
    /// Any read failure or hole in the history fails the whole build; no
    /// partial state is returned.
    pub async fn build_doc_for_checkpoint(
        &self,
        doc_info: &DocInfo,
        checkpoint: Checkpoint,
        actor: ActorId,
    ) -> SyncResult<Document> {
        let span = info_span!(
            spans::BUILD_SNAPSHOT,
            doc_key = %doc_info.key,
            checkpoint = %checkpoint,
        );

        async move {
            if checkpoint.server_seq > doc_info.server_seq {
                return Err(SyncError::snapshot_build_failed(format!(
                    "checkpoint {} is ahead of document server_seq {}",
                    checkpoint, doc_info.server_seq
                )));
            }

            let (state, lamport) = self
                .materialize(&doc_info.ref_key(), checkpoint.server_seq)
                .await?;
            Ok(Document::from_state(
                doc_info.key.clone(),
                state,
                checkpoint,
                actor,
                lamport,
            ))
        }
        .instrument(span)
        .await
    }

    /// Encoded document state as of `server_seq`, with its highest lamport
    pub async fn encode_state_at(
        &self,
        doc: &DocRefKey,
        server_seq: u64,
    ) -> SyncResult<(Vec<u8>, u64)> {
        let (state, lamport) = self.materialize(doc, server_seq).await?;
        let bytes = state
            .to_bytes()
            .map_err(|e| SyncError::snapshot_build_failed(e.to_string()))?;
        Ok((bytes, lamport))
    }

    /// Store a snapshot if the last push moved the document far enough
    ///
    /// Returns whether a snapshot was written. Failures are logged and
    /// reported as `false`; they never fail the caller.
    pub async fn store_snapshot_if_needed(&self, doc_info: &DocInfo, previous_server_seq: u64) -> bool {
        let interval = self.config.interval;
        let server_seq = doc_info.server_seq;
        if interval == 0 || server_seq <= previous_server_seq {
            return false;
        }
        if server_seq / interval == previous_server_seq / interval {
            return false;
        }

        let span = info_span!(
            spans::STORE_SNAPSHOT,
            doc_key = %doc_info.key,
            server_seq,
        );

        async move {
            let doc = doc_info.ref_key();
            let latest = match self.db.find_closest_snapshot(&doc, server_seq).await {
                Ok(latest) => latest.map(|s| s.server_seq).unwrap_or(0),
                Err(e) => {
                    warn!(error = %e, "Failed to look up latest snapshot");
                    return false;
                }
            };
            if server_seq - latest < self.config.threshold {
                debug!(latest, "Latest snapshot is recent enough");
                return false;
            }

            let (state, lamport) = match self.materialize(&doc, server_seq).await {
                Ok(built) => built,
                Err(e) => {
                    warn!(error = %e, "Failed to build snapshot");
                    return false;
                }
            };
            let snapshot = Snapshot::new(doc_info.id, server_seq, lamport, state);
            match self.db.store_snapshot(&doc, &snapshot).await {
                Ok(()) => {
                    info!(previous = latest, "Stored snapshot");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store snapshot");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Replay from the closest snapshot up to `server_seq`
    ///
    /// Returns the state and the highest lamport clock seen.
    async fn materialize(&self, doc: &DocRefKey, server_seq: u64) -> SyncResult<(DocumentState, u64)> {
        let base = self
            .db
            .find_closest_snapshot(doc, server_seq)
            .await
            .map_err(|e| SyncError::snapshot_build_failed(e.to_string()))?;

        let (mut state, base_seq, mut lamport) = match base {
            Some(snapshot) => (snapshot.state, snapshot.server_seq, snapshot.lamport),
            None => (DocumentState::new(), 0, 0),
        };

        if base_seq == server_seq {
            return Ok((state, lamport));
        }

        let changes = self
            .db
            .find_changes_between_server_seqs(doc, base_seq + 1, server_seq)
            .await
            .map_err(|e| SyncError::snapshot_build_failed(e.to_string()))?;

        let mut expected = base_seq;
        for change in &changes {
            expected += 1;
            if change.server_seq() != expected {
                return Err(SyncError::snapshot_build_failed(format!(
                    "history of {} has a gap at server_seq {}",
                    doc, expected
                )));
            }
            state.apply_change(change);
            lamport = lamport.max(change.id.lamport);
        }
        if expected != server_seq {
            return Err(SyncError::snapshot_build_failed(format!(
                "history of {} ends at server_seq {}, expected {}",
                doc, expected, server_seq
            )));
        }

        debug!(base_seq, replayed = changes.len(), "Materialized document");
        Ok((state, lamport))
    }
}
