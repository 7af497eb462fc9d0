//! Shared collaborators of the node services

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use quill_coordinator::{
    Coordinator, LeaseCoordinator, LeaseStore, LockKey, MemoryCoordinator, with_lock,
};
use quill_core::{DocKey, OpContext, ProjectId};
use quill_storage::{Database, MemoryDatabase, RedbDatabase};
use quill_sync::{Directory, PushPullEngine, SnapshotBuilder};

use crate::config::{NodeConfig, StorageBackend};
use crate::error::NodeResult;

/// Coordinator, storage and engine shared by every service of a node
///
/// Cheap to clone; all collaborators are reference counted.
#[derive(Clone)]
pub struct Backend {
    config: Arc<NodeConfig>,
    coordinator: Arc<dyn Coordinator>,
    database: Arc<dyn Database>,
    directory: Directory,
    engine: PushPullEngine,
}

impl Backend {
    /// Single-node backend with an in-process coordinator
    pub fn new(config: NodeConfig) -> NodeResult<Self> {
        let database = open_database(&config.storage)?;
        Ok(Self::with_parts(config, Arc::new(MemoryCoordinator::new()), database))
    }

    /// Cluster member whose document locks are leases in `store`
    pub fn with_lease_store<S: LeaseStore + 'static>(
        config: NodeConfig,
        store: Arc<S>,
    ) -> NodeResult<Self> {
        let database = open_database(&config.storage)?;
        let coordinator = LeaseCoordinator::new(config.node_id.clone(), store, config.lock.lease_config());
        Ok(Self::with_parts(config, Arc::new(coordinator), database))
    }

    /// Assemble a backend from existing collaborators
    ///
    /// Nodes of one cluster share the database and a coordinator backed by
    /// the same lock service.
    pub fn with_parts(
        config: NodeConfig,
        coordinator: Arc<dyn Coordinator>,
        database: Arc<dyn Database>,
    ) -> Self {
        let snapshots = SnapshotBuilder::new(Arc::clone(&database), config.snapshot.clone());
        let engine = PushPullEngine::new(Arc::clone(&database), snapshots);
        let directory = Directory::new(Arc::clone(&database));

        info!(node = %config.node_id, "Backend ready");
        Self {
            config: Arc::new(config),
            coordinator,
            database,
            directory,
            engine,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn engine(&self) -> &PushPullEngine {
        &self.engine
    }

    /// Run `f` while holding the push-pull lock of one document
    ///
    /// Waiting for the lock is bounded by the configured acquire timeout
    /// and by `ctx`. When the wait fails `f` never runs. The lock is given
    /// back once `f` finishes, whatever its outcome.
    pub async fn with_document_lock<F, Fut, T>(
        &self,
        ctx: &OpContext,
        project_id: &ProjectId,
        doc_key: &DocKey,
        f: F,
    ) -> NodeResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = NodeResult<T>>,
    {
        let key = LockKey::push_pull(project_id, doc_key);
        with_lock(
            self.coordinator.as_ref(),
            key,
            ctx,
            self.config.lock.acquire_timeout,
            f,
        )
        .await
    }
}

fn open_database(storage: &StorageBackend) -> NodeResult<Arc<dyn Database>> {
    match storage {
        StorageBackend::Memory => Ok(Arc::new(MemoryDatabase::new())),
        StorageBackend::Redb(config) => {
            let db = RedbDatabase::open(config.clone())?;
            debug!(path = %config.path.display(), "Opened redb storage");
            Ok(Arc::new(db))
        }
    }
}
