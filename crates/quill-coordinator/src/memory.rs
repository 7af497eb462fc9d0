//! In-process coordinator
//!
//! Each key maps to a `tokio` mutex shared by every locker built from the
//! same [`MemoryCoordinator`] (or its clones). Idle entries are dropped on
//! release so the map only holds keys with holders or waiters.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, warn};

use quill_core::OpContext;

use crate::error::LockError;
use crate::{Coordinator, LockCounters, LockKey, LockStats, Locker};

#[derive(Debug, Default)]
struct MemoryInner {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    counters: LockCounters,
}

impl MemoryInner {
    fn mutex_for(&self, key: &LockKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Drop the entry when nobody holds or waits on it
    fn forget_if_idle(&self, key: &LockKey) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Process-local [`Coordinator`]
///
/// Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    inner: Arc<MemoryInner>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.inner.locks.len()
    }
}

impl Coordinator for MemoryCoordinator {
    fn new_locker(&self, key: LockKey) -> Box<dyn Locker> {
        Box::new(MemoryLocker {
            key,
            inner: Arc::clone(&self.inner),
            guard: parking_lot::Mutex::new(None),
        })
    }

    fn stats(&self) -> LockStats {
        self.inner.counters.snapshot()
    }
}

struct MemoryLocker {
    key: LockKey,
    inner: Arc<MemoryInner>,
    guard: parking_lot::Mutex<Option<OwnedMutexGuard<()>>>,
}

#[async_trait]
impl Locker for MemoryLocker {
    fn key(&self) -> &LockKey {
        &self.key
    }

    async fn lock(&self, ctx: &OpContext) -> Result<(), LockError> {
        if self.guard.lock().is_some() {
            return Err(LockError::AlreadyHeld {
                key: self.key.clone(),
            });
        }

        if let Some(reason) = ctx.err() {
            let err = LockError::from_done(&self.key, reason);
            self.inner.counters.record_lock_error(&err);
            return Err(err);
        }

        let mutex = self.inner.mutex_for(&self.key);
        let acquired = tokio::select! {
            biased;
            guard = mutex.lock_owned() => Ok(guard),
            reason = ctx.done() => Err(LockError::from_done(&self.key, reason)),
        };

        match acquired {
            Ok(guard) => {
                *self.guard.lock() = Some(guard);
                self.inner.counters.record_acquired();
                trace!(key = %self.key, "Lock acquired");
                Ok(())
            }
            Err(err) => {
                self.inner.counters.record_lock_error(&err);
                self.inner.forget_if_idle(&self.key);
                Err(err)
            }
        }
    }

    async fn unlock(&self, _ctx: &OpContext) -> Result<(), LockError> {
        let guard = self.guard.lock().take();
        match guard {
            Some(guard) => {
                drop(guard);
                self.inner.forget_if_idle(&self.key);
                self.inner.counters.record_released();
                trace!(key = %self.key, "Lock released");
                Ok(())
            }
            None => {
                self.inner.counters.record_release_failure();
                Err(LockError::NotHeld {
                    key: self.key.clone(),
                })
            }
        }
    }
}

impl Drop for MemoryLocker {
    fn drop(&mut self) {
        if self.guard.get_mut().take().is_some() {
            warn!(key = %self.key, "Locker dropped while holding lock; releasing");
            self.inner.counters.record_released();
            self.inner.forget_if_idle(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key() -> LockKey {
        LockKey::new("pushpull-p-doc")
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let coordinator = MemoryCoordinator::new();
        let locker = coordinator.new_locker(key());
        let ctx = OpContext::background();

        locker.lock(&ctx).await.unwrap();
        assert_eq!(coordinator.active_keys(), 1);
        locker.unlock(&ctx).await.unwrap();
        assert_eq!(coordinator.active_keys(), 0);

        let stats = coordinator.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn test_second_locker_times_out_while_held() {
        let coordinator = MemoryCoordinator::new();
        let holder = coordinator.new_locker(key());
        holder.lock(&OpContext::background()).await.unwrap();

        let waiter = coordinator.new_locker(key());
        let ctx = OpContext::with_timeout(Duration::from_millis(20));
        let err = waiter.lock(&ctx).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(coordinator.stats().timeouts, 1);

        holder.unlock(&OpContext::background()).await.unwrap();
        waiter.lock(&OpContext::background()).await.unwrap();
        waiter.unlock(&OpContext::background()).await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let coordinator = MemoryCoordinator::new();
        let a = coordinator.new_locker(LockKey::new("a"));
        let b = coordinator.new_locker(LockKey::new("b"));
        let ctx = OpContext::with_timeout(Duration::from_millis(50));

        a.lock(&ctx).await.unwrap();
        b.lock(&ctx).await.unwrap();
        assert_eq!(coordinator.active_keys(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast() {
        let coordinator = MemoryCoordinator::new();
        let locker = coordinator.new_locker(key());
        let ctx = OpContext::background();
        ctx.cancel();

        let err = locker.lock(&ctx).await.unwrap_err();
        assert!(matches!(err, LockError::Cancelled { .. }));
        assert_eq!(coordinator.stats().acquired, 0);
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let coordinator = MemoryCoordinator::new();
        let locker = coordinator.new_locker(key());
        let err = locker.unlock(&OpContext::background()).await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld { .. }));
        assert_eq!(coordinator.stats().release_failures, 1);
    }

    #[tokio::test]
    async fn test_double_lock_same_handle() {
        let coordinator = MemoryCoordinator::new();
        let locker = coordinator.new_locker(key());
        let ctx = OpContext::background();
        locker.lock(&ctx).await.unwrap();
        assert!(matches!(
            locker.lock(&ctx).await,
            Err(LockError::AlreadyHeld { .. })
        ));
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let coordinator = MemoryCoordinator::new();
        {
            let locker = coordinator.new_locker(key());
            locker.lock(&OpContext::background()).await.unwrap();
        }
        let other = coordinator.new_locker(key());
        other
            .lock(&OpContext::with_timeout(Duration::from_millis(50)))
            .await
            .unwrap();
    }
}
