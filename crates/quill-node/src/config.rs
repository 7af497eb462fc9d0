//! Configuration for a sync node

use std::time::Duration;

use serde::{Deserialize, Serialize};

use quill_coordinator::LeaseConfig;
use quill_logging::LogConfig;
use quill_storage::RedbConfig;
use quill_sync::SnapshotConfig;

/// Document lock timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Longest wait for a document lock before failing with a timeout
    pub acquire_timeout: Duration,
    /// Lifetime of a cluster lease that is never released
    pub lease_ttl: Duration,
    /// Pause between attempts on a contended lease
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(10),
            lease_ttl: Duration::from_secs(30),
            retry_interval: Duration::from_millis(20),
        }
    }
}

impl LockConfig {
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig::default()
            .with_ttl(self.lease_ttl)
            .with_retry_interval(self.retry_interval)
    }
}

/// Where records and history live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StorageBackend {
    /// In-process maps; nothing survives a restart
    #[default]
    Memory,
    /// Embedded redb file
    Redb(RedbConfig),
}

/// Configuration for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name of this node in the cluster, used in lease tokens and logs
    pub node_id: String,
    /// Document lock configuration
    pub lock: LockConfig,
    /// Snapshot cadence
    pub snapshot: SnapshotConfig,
    /// Storage backend
    pub storage: StorageBackend,
    /// Logging setup for binaries embedding the node
    pub log: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "quill-node".to_string(),
            lock: LockConfig::default(),
            snapshot: SnapshotConfig::default(),
            storage: StorageBackend::default(),
            log: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration for a named node
    pub fn with_node_id(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Encode for persisting next to the node data
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
