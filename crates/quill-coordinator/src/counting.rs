//! Coordinator wrapper that records lock traffic
//!
//! Used by tests to assert that an operation never reached the lock (or
//! reached it exactly once).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use quill_core::OpContext;

use crate::error::LockError;
use crate::{Coordinator, LockKey, LockStats, Locker};

#[derive(Debug, Default)]
struct Counts {
    lockers_created: AtomicU64,
    lock_attempts: AtomicU64,
}

/// Wraps any [`Coordinator`] and counts lockers and lock attempts
#[derive(Debug)]
pub struct CountingCoordinator<C> {
    inner: C,
    counts: Arc<Counts>,
}

impl<C: Coordinator> CountingCoordinator<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            counts: Arc::new(Counts::default()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn lockers_created(&self) -> u64 {
        self.counts.lockers_created.load(Ordering::SeqCst)
    }

    pub fn lock_attempts(&self) -> u64 {
        self.counts.lock_attempts.load(Ordering::SeqCst)
    }
}

impl<C: Coordinator> Coordinator for CountingCoordinator<C> {
    fn new_locker(&self, key: LockKey) -> Box<dyn Locker> {
        self.counts.lockers_created.fetch_add(1, Ordering::SeqCst);
        Box::new(CountingLocker {
            inner: self.inner.new_locker(key),
            counts: Arc::clone(&self.counts),
        })
    }

    fn stats(&self) -> LockStats {
        self.inner.stats()
    }
}

struct CountingLocker {
    inner: Box<dyn Locker>,
    counts: Arc<Counts>,
}

#[async_trait]
impl Locker for CountingLocker {
    fn key(&self) -> &LockKey {
        self.inner.key()
    }

    async fn lock(&self, ctx: &OpContext) -> Result<(), LockError> {
        self.counts.lock_attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.lock(ctx).await
    }

    async fn unlock(&self, ctx: &OpContext) -> Result<(), LockError> {
        self.inner.unlock(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCoordinator;

    #[tokio::test]
    async fn test_counts_attempts() {
        let coordinator = CountingCoordinator::new(MemoryCoordinator::new());
        assert_eq!(coordinator.lock_attempts(), 0);

        let locker = coordinator.new_locker(LockKey::new("k"));
        assert_eq!(coordinator.lockers_created(), 1);
        assert_eq!(coordinator.lock_attempts(), 0);

        let ctx = OpContext::background();
        locker.lock(&ctx).await.unwrap();
        locker.unlock(&ctx).await.unwrap();

        assert_eq!(coordinator.lock_attempts(), 1);
        assert_eq!(coordinator.stats().released, 1);
        assert_eq!(coordinator.inner().active_keys(), 0);
    }
}
