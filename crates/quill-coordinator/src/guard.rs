//! Scoped lock acquisition
//!
//! Once a lock is acquired it must be released on every exit path of the
//! guarded work, including errors, cancellation and panics. Release errors
//! are logged and never surface to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::{Instrument, debug, error, info_span, warn};

use quill_core::OpContext;
use quill_logging::spans;

use crate::error::LockError;
use crate::{Coordinator, LockKey, Locker};

/// Held lock that is released when the guard goes away
pub struct LockGuard {
    locker: Option<Box<dyn Locker>>,
}

impl LockGuard {
    /// Lock `locker`; on failure nothing is held and the handle is dropped
    pub async fn acquire(locker: Box<dyn Locker>, ctx: &OpContext) -> Result<Self, LockError> {
        locker.lock(ctx).await?;
        Ok(Self {
            locker: Some(locker),
        })
    }

    pub fn key(&self) -> Option<&LockKey> {
        self.locker.as_deref().map(|locker| locker.key())
    }

    /// Release the lock, logging any failure
    ///
    /// The release runs under a fresh background context so a caller whose
    /// deadline already passed still gives the lock back.
    pub async fn release(mut self, ctx: &OpContext) {
        if let Some(locker) = self.locker.take() {
            if let Some(reason) = ctx.err() {
                warn!(key = %locker.key(), %reason, "Releasing lock after context ended");
            }
            unlock_logged(locker.as_ref()).await;
        }
    }
}

async fn unlock_logged(locker: &dyn Locker) {
    if let Err(err) = locker.unlock(&OpContext::background()).await {
        error!(key = %locker.key(), error = %err, "Failed to release lock");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(locker) = self.locker.take() else {
            return;
        };

        warn!(key = %locker.key(), "Lock guard dropped without release; unlocking");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    unlock_logged(locker.as_ref()).await;
                });
            }
            Err(_) => {
                // No runtime to run the release on; the locker's own drop
                // handling is all that is left.
                error!(key = %locker.key(), "No runtime available to release lock");
            }
        }
    }
}

/// Run `f` while holding the lock named `key`
///
/// Waiting for the lock is bounded by `wait` and by `ctx`; when the wait
/// fails `f` never runs and the error is converted into the caller's type.
/// The lock is released after `f` completes whatever its outcome.
pub async fn with_lock<C, F, Fut, T, E>(
    coordinator: &C,
    key: LockKey,
    ctx: &OpContext,
    wait: Duration,
    f: F,
) -> Result<T, E>
where
    C: Coordinator + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    let acquire_ctx = ctx.child_with_timeout(wait);
    let span = info_span!(spans::ACQUIRE_LOCK, lock_key = %key);
    let guard = LockGuard::acquire(coordinator.new_locker(key.clone()), &acquire_ctx)
        .instrument(span)
        .await?;
    debug!(lock_key = %key, "Lock held");

    let result = f().await;
    guard.release(ctx).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCoordinator;

    const WAIT: Duration = Duration::from_secs(1);

    #[derive(Debug, PartialEq)]
    enum TestError {
        Lock,
        Work,
    }

    impl From<LockError> for TestError {
        fn from(_: LockError) -> Self {
            TestError::Lock
        }
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_success() {
        let coordinator = MemoryCoordinator::new();
        let ctx = OpContext::background();

        let value = with_lock(&coordinator, LockKey::new("k"), &ctx, WAIT, || async {
            Ok::<_, TestError>(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        let stats = coordinator.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let coordinator = MemoryCoordinator::new();
        let ctx = OpContext::background();

        let result: Result<(), TestError> =
            with_lock(&coordinator, LockKey::new("k"), &ctx, WAIT, || async {
                Err(TestError::Work)
            })
            .await;

        assert_eq!(result, Err(TestError::Work));
        assert_eq!(coordinator.stats().held(), 0);
    }

    #[tokio::test]
    async fn test_acquire_failure_skips_work() {
        let coordinator = MemoryCoordinator::new();
        let holder = coordinator.new_locker(LockKey::new("k"));
        holder.lock(&OpContext::background()).await.unwrap();

        let ctx = OpContext::background();
        let mut ran = false;
        let result: Result<(), TestError> =
            with_lock(&coordinator, LockKey::new("k"), &ctx, Duration::from_millis(20), || {
                ran = true;
                async { Ok(()) }
            })
            .await;

        assert_eq!(result, Err(TestError::Lock));
        assert!(!ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_bounds_acquisition_not_work() {
        let coordinator = MemoryCoordinator::new();
        let ctx = OpContext::background();

        let value = with_lock(
            &coordinator,
            LockKey::new("k"),
            &ctx,
            Duration::from_millis(10),
            || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, TestError>("done")
            },
        )
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(coordinator.stats().released, 1);
    }

    #[tokio::test]
    async fn test_release_after_deadline_still_unlocks() {
        let coordinator = MemoryCoordinator::new();
        let ctx = OpContext::with_timeout(Duration::from_millis(10));
        let guard = LockGuard::acquire(coordinator.new_locker(LockKey::new("k")), &ctx)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.release(&ctx).await;
        assert_eq!(coordinator.stats().released, 1);
    }

    #[tokio::test]
    async fn test_panicking_work_still_releases() {
        let coordinator = MemoryCoordinator::new();
        let task_coordinator = coordinator.clone();

        let handle = tokio::spawn(async move {
            let ctx = OpContext::background();
            let fail = true;
            let _: Result<(), TestError> =
                with_lock(&task_coordinator, LockKey::new("k"), &ctx, WAIT, || async move {
                    if fail {
                        panic!("work failed");
                    }
                    Ok(())
                })
                .await;
        });
        assert!(handle.await.unwrap_err().is_panic());

        let other = coordinator.new_locker(LockKey::new("k"));
        other
            .lock(&OpContext::with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_unlocks_in_background() {
        let coordinator = MemoryCoordinator::new();
        {
            let _guard = LockGuard::acquire(
                coordinator.new_locker(LockKey::new("k")),
                &OpContext::background(),
            )
            .await
            .unwrap();
        }

        let other = coordinator.new_locker(LockKey::new("k"));
        other
            .lock(&OpContext::with_timeout(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(coordinator.active_keys(), 1);
    }
}
