//! # Quill Coordinator
//!
//! Named, cluster-wide mutual exclusion for document mutations.
//!
//! A [`Coordinator`] hands out [`Locker`] handles for a [`LockKey`].
//! Building a handle never blocks; [`Locker::lock`] waits until the key is
//! held or the caller's [`OpContext`] is done. Lock identity is purely a
//! function of the key, so any two coordinators that share a backing store
//! agree on who holds it.
//!
//! ## Implementations
//!
//! - [`MemoryCoordinator`]: process-local, for single-node deployments and tests
//! - [`LeaseCoordinator`]: cluster-wide, over a pluggable [`LeaseStore`]
//! - [`CountingCoordinator`]: wrapper that records lock traffic for tests
//!
//! ## Scoped acquisition
//!
//! [`LockGuard`] and [`with_lock`] release the lock on every exit path.
//! A failed release is logged and never replaces the guarded result.
//!
//! ```rust,ignore
//! let key = LockKey::push_pull(&project.id, &doc_key);
//! let result = with_lock(&coordinator, key, &ctx, Duration::from_secs(5), || async {
//!     // mutate the document
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! ```

pub mod counting;
pub mod error;
pub mod guard;
pub mod lease;
pub mod memory;

pub use counting::CountingCoordinator;
pub use error::LockError;
pub use guard::{LockGuard, with_lock};
pub use lease::{LeaseConfig, LeaseCoordinator, LeaseStore, LeaseToken, SharedLeaseStore};
pub use memory::MemoryCoordinator;

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quill_core::{DocKey, OpContext, ProjectId};

/// Name of a lock
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Key guarding every mutating reconciliation of one document
    pub fn push_pull(project_id: &ProjectId, doc_key: &DocKey) -> Self {
        Self(format!("pushpull-{}-{}", project_id, doc_key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on a single named lock
#[async_trait]
pub trait Locker: Send + Sync {
    fn key(&self) -> &LockKey;

    /// Wait until the lock is held cluster-wide
    ///
    /// Fails with [`LockError::Timeout`] or [`LockError::Cancelled`] when
    /// the context is done first, and with [`LockError::Unavailable`] when
    /// the backing service cannot be reached. Nothing is held on failure.
    async fn lock(&self, ctx: &OpContext) -> Result<(), LockError>;

    /// Release the lock
    ///
    /// Implementations must not give up because `ctx` is done: a release
    /// is attempted even for cancelled operations.
    async fn unlock(&self, ctx: &OpContext) -> Result<(), LockError>;
}

/// Factory of lockers
pub trait Coordinator: Send + Sync {
    /// Build a handle for `key`; never blocks or contends
    fn new_locker(&self, key: LockKey) -> Box<dyn Locker>;

    /// Snapshot of lock traffic counters
    fn stats(&self) -> LockStats;
}

/// Lock traffic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    pub acquired: u64,
    pub released: u64,
    pub timeouts: u64,
    pub release_failures: u64,
}

impl LockStats {
    /// Locks acquired and not yet released
    pub fn held(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Shared atomic counters behind [`LockStats`]
#[derive(Debug, Default)]
pub(crate) struct LockCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    timeouts: AtomicU64,
    release_failures: AtomicU64,
}

impl LockCounters {
    pub(crate) fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_lock_error(&self, err: &LockError) {
        if matches!(err, LockError::Timeout { .. } | LockError::Cancelled { .. }) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_release_failure(&self) {
        self.release_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            timeouts: self.timeouts.load(Ordering::SeqCst),
            release_failures: self.release_failures.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the coordinator traits are object-safe
    fn _assert_object_safe(_: &dyn Coordinator, _: &dyn Locker) {}

    #[test]
    fn test_push_pull_key_is_scoped_by_project_and_doc() {
        let project = ProjectId::new([1; 12]);
        let other = ProjectId::new([2; 12]);
        let doc = DocKey::new("notes").unwrap();

        let key = LockKey::push_pull(&project, &doc);
        assert_eq!(key, LockKey::push_pull(&project, &doc));
        assert_ne!(key, LockKey::push_pull(&other, &doc));
        assert_ne!(key, LockKey::push_pull(&project, &DocKey::new("todo").unwrap()));
        assert!(key.as_str().starts_with("pushpull-"));
        assert!(key.as_str().ends_with("-notes"));
    }

    #[test]
    fn test_stats_held() {
        let stats = LockStats {
            acquired: 5,
            released: 3,
            ..Default::default()
        };
        assert_eq!(stats.held(), 2);
    }
}
