//! # Quill Sync
//!
//! Reconciliation of client replicas with the authoritative document
//! history.
//!
//! ## Components
//!
//! - [`Directory`]: client and document record lookups
//! - [`Document`]: a materialized replica with queued local changes
//! - [`SnapshotBuilder`]: replays history up to a checkpoint, maintains snapshots
//! - [`PushPullEngine`]: merges a change pack, pulls missing changes, drives the lifecycle
//!
//! ## Example
//!
//! ```ignore
//! let mut doc = engine
//!     .snapshots()
//!     .build_doc_for_checkpoint(&doc_info, client_info.checkpoint(&doc_info.id), actor)
//!     .await?;
//! doc.update(None, |ctx| ctx.clear_presence());
//!
//! let result = engine
//!     .push_pull(&project_id, &client_info, &doc_info, doc.create_change_pack(), PushPullOptions::detach())
//!     .await?;
//! ```

pub mod directory;
pub mod document;
pub mod error;
pub mod pushpull;
pub mod snapshot;

pub use directory::Directory;
pub use document::{ChangeContext, Document};
pub use error::{SyncError, SyncResult};
pub use pushpull::{PushPullEngine, PushPullOptions, PushPullResult};
pub use snapshot::{SnapshotBuilder, SnapshotConfig};
