//! Lease-based cluster coordinator
//!
//! A [`LeaseStore`] is the shared authority every node talks to (a
//! consensus-backed KV store in production). A lock is a lease on the key
//! held by a unique [`LeaseToken`]; acquiring polls `try_acquire` until it
//! succeeds or the caller's context is done. Leases expire after `ttl` so
//! a crashed holder cannot block a document forever.
//!
//! While a locker holds its lease, a keep-alive task renews it every third
//! of `ttl`, so guarded work may run longer than `ttl`. The task stops on
//! unlock, on drop, and as soon as a renewal finds the lease gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use quill_core::OpContext;

use crate::error::LockError;
use crate::{Coordinator, LockCounters, LockKey, LockStats, Locker};

/// Unique identity of one lease holder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Fresh token for a locker on `node_id`
    pub fn generate(node_id: &str) -> Self {
        Self(format!("{}-{:016x}", node_id, rand::random::<u64>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shared authority over leases
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease on `key` if it is free, expired, or already ours
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Extend a lease `token` still holds to `ttl` from now
    ///
    /// `false` once the lease has expired or belongs to someone else; a
    /// lost lease is never taken back this way.
    async fn renew(
        &self,
        key: &LockKey,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Give the lease back; `false` if `token` no longer holds it
    async fn release(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, LockError>;
}

#[derive(Debug, Clone)]
struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

/// In-memory [`LeaseStore`] shared by several coordinators
///
/// Models the cluster's coordination service: every simulated node holds
/// an `Arc` to the same store. Reachability can be toggled to exercise
/// `Unavailable` paths.
#[derive(Debug)]
pub struct SharedLeaseStore {
    leases: DashMap<LockKey, Lease>,
    reachable: AtomicBool,
}

impl Default for SharedLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current unexpired holder of `key`
    pub fn holder(&self, key: &LockKey) -> Option<LeaseToken> {
        self.leases
            .get(key)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.token.clone())
    }

    fn ensure_reachable(&self) -> Result<(), LockError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::unavailable("lease store unreachable"))
        }
    }
}

#[async_trait]
impl LeaseStore for SharedLeaseStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        self.ensure_reachable()?;
        let now = Instant::now();
        let lease = Lease {
            token: token.clone(),
            expires_at: now + ttl,
        };

        match self.leases.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.token == *token || current.expires_at <= now {
                    if current.token != *token {
                        debug!(key = %key, previous = %current.token.as_str(), "Taking over expired lease");
                    }
                    entry.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(lease);
                Ok(true)
            }
        }
    }

    async fn renew(
        &self,
        key: &LockKey,
        token: &LeaseToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        self.ensure_reachable()?;
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.token == *token && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &LockKey, token: &LeaseToken) -> Result<bool, LockError> {
        self.ensure_reachable()?;
        Ok(self
            .leases
            .remove_if(key, |_, lease| lease.token == *token)
            .is_some())
    }
}

/// Lease timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// How long a lease survives without release
    pub ttl: Duration,
    /// Pause between acquisition attempts while contended
    pub retry_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_interval: Duration::from_millis(20),
        }
    }
}

impl LeaseConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Pause between renewals of a held lease
    pub fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(1))
    }
}

/// Cluster-wide [`Coordinator`] over a [`LeaseStore`]
pub struct LeaseCoordinator<S: LeaseStore> {
    node_id: String,
    store: Arc<S>,
    config: LeaseConfig,
    counters: Arc<LockCounters>,
}

impl<S: LeaseStore> LeaseCoordinator<S> {
    pub fn new(node_id: impl Into<String>, store: Arc<S>, config: LeaseConfig) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            config,
            counters: Arc::new(LockCounters::default()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }
}

impl<S: LeaseStore + 'static> Coordinator for LeaseCoordinator<S> {
    fn new_locker(&self, key: LockKey) -> Box<dyn Locker> {
        Box::new(LeaseLocker {
            token: LeaseToken::generate(&self.node_id),
            key,
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
            held: AtomicBool::new(false),
            keep_alive: Mutex::new(None),
        })
    }

    fn stats(&self) -> LockStats {
        self.counters.snapshot()
    }
}

struct LeaseLocker<S: LeaseStore> {
    key: LockKey,
    token: LeaseToken,
    store: Arc<S>,
    config: LeaseConfig,
    counters: Arc<LockCounters>,
    held: AtomicBool,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl<S: LeaseStore + 'static> LeaseLocker<S> {
    fn fail(&self, err: LockError) -> Result<(), LockError> {
        self.counters.record_lock_error(&err);
        Err(err)
    }

    /// Renew the lease until aborted or until it turns out to be lost
    fn start_keep_alive(&self) {
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = self.token.clone();
        let ttl = self.config.ttl;
        let every = self.config.renew_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.renew(&key, &token, ttl).await {
                    Ok(true) => trace!(key = %key, "Lease renewed"),
                    Ok(false) => {
                        warn!(key = %key, token = %token.as_str(), "Lease lost while held");
                        return;
                    }
                    Err(err) => warn!(key = %key, error = %err, "Lease renewal failed"),
                }
            }
        });
        if let Some(previous) = self.keep_alive.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_keep_alive(&self) {
        if let Some(task) = self.keep_alive.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl<S: LeaseStore + 'static> Locker for LeaseLocker<S> {
    fn key(&self) -> &LockKey {
        &self.key
    }

    async fn lock(&self, ctx: &OpContext) -> Result<(), LockError> {
        if self.held.load(Ordering::SeqCst) {
            return Err(LockError::AlreadyHeld {
                key: self.key.clone(),
            });
        }

        loop {
            if let Some(reason) = ctx.err() {
                return self.fail(LockError::from_done(&self.key, reason));
            }

            match self
                .store
                .try_acquire(&self.key, &self.token, self.config.ttl)
                .await
            {
                Ok(true) => {
                    self.held.store(true, Ordering::SeqCst);
                    self.start_keep_alive();
                    self.counters.record_acquired();
                    trace!(key = %self.key, token = %self.token.as_str(), "Lease acquired");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => return self.fail(err),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_interval) => {}
                reason = ctx.done() => {
                    return self.fail(LockError::from_done(&self.key, reason));
                }
            }
        }
    }

    async fn unlock(&self, _ctx: &OpContext) -> Result<(), LockError> {
        if !self.held.swap(false, Ordering::SeqCst) {
            self.counters.record_release_failure();
            return Err(LockError::NotHeld {
                key: self.key.clone(),
            });
        }
        self.stop_keep_alive();

        match self.store.release(&self.key, &self.token).await {
            Ok(true) => {
                self.counters.record_released();
                trace!(key = %self.key, "Lease released");
                Ok(())
            }
            Ok(false) => {
                self.counters.record_release_failure();
                Err(LockError::NotHeld {
                    key: self.key.clone(),
                })
            }
            Err(err) => {
                self.counters.record_release_failure();
                Err(err)
            }
        }
    }
}

impl<S: LeaseStore> Drop for LeaseLocker<S> {
    fn drop(&mut self) {
        if let Some(task) = self.keep_alive.get_mut().take() {
            task.abort();
        }
        if *self.held.get_mut() {
            warn!(
                key = %self.key,
                ttl_ms = self.config.ttl.as_millis() as u64,
                "Lease locker dropped while held; lease will expire"
            );
        }
    }
}
