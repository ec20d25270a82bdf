//! The engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use ferrite_common::config::EngineConfig;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::NodeId;
use ferrite_log::LogManager;
use ferrite_memory::{PagePool, PagePoolStat};
use ferrite_snapshot::{SavepointManager, SnapshotManager};
use ferrite_storage::StorageManager;
use ferrite_xct::{XctConfig, XctManager};

/// The engine: owner of every manager and of all page memory.
///
/// # Example
///
/// ```no_run
/// use ferrite_common::config::EngineConfig;
/// use ferrite_engine::Engine;
///
/// let engine = Engine::new(EngineConfig::default()).unwrap();
/// engine.initialize().unwrap();
/// // ... create storages, run transactions ...
/// engine.uninitialize().unwrap();
/// ```
pub struct Engine {
    config: Arc<EngineConfig>,
    pools: Vec<Arc<PagePool>>,
    log: Arc<LogManager>,
    xct: Arc<XctManager>,
    storages: Arc<StorageManager>,
    savepoint: Arc<SavepointManager>,
    snapshot: SnapshotManager,
    initialized: AtomicBool,
}

impl Engine {
    /// Builds every module in dependency order. Daemons are not running
    /// until [`initialize`] is called.
    ///
    /// [`initialize`]: Engine::initialize
    pub fn new(config: EngineConfig) -> FerriteResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            nodes = config.thread.group_count,
            workers_per_node = config.thread.thread_count_per_group,
            pool_mb = config.memory.page_pool_size_mb_per_node,
            "constructing engine"
        );

        let pools: Vec<Arc<PagePool>> = (0..config.thread.group_count)
            .map(|node| {
                PagePool::new(
                    NodeId::new(node),
                    config.memory.page_pool_size_mb_per_node << 20,
                )
                .map(Arc::new)
            })
            .collect::<FerriteResult<_>>()?;

        let log = Arc::new(LogManager::new(&config)?);
        let xct = Arc::new(XctManager::new(
            Arc::clone(&log),
            config.thread.total_workers(),
            XctConfig::default(),
        ));
        let storages = Arc::new(StorageManager::new(
            &config,
            Arc::clone(&log),
            pools.clone(),
        )?);
        xct.set_applier(Arc::clone(&storages) as Arc<dyn ferrite_xct::WriteApplier>);
        let savepoint = Arc::new(SavepointManager::new(&config)?);
        let snapshot = SnapshotManager::new(
            Arc::clone(&config),
            Arc::clone(&log),
            Arc::clone(&xct),
            Arc::clone(&storages),
            Arc::clone(&savepoint),
            pools.clone(),
        )?;

        Ok(Self {
            config,
            pools,
            log,
            xct,
            storages,
            savepoint,
            snapshot,
            initialized: AtomicBool::new(false),
        })
    }

    /// Starts the snapshot daemons.
    pub fn initialize(&self) -> FerriteResult<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Err(FerriteError::internal("engine is already initialized"));
        }
        self.snapshot.start();
        info!("engine initialized");
        Ok(())
    }

    /// Returns true while the engine is initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Stops the daemons and tears the modules down in reverse order.
    ///
    /// Flushes the log when `log.flush_at_shutdown` is set, then returns
    /// every remaining volatile page to its pool so teardown finds the
    /// pools whole.
    pub fn uninitialize(&self) -> FerriteResult<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Err(FerriteError::DependentModuleUnavailableUninit { module: "engine" });
        }
        info!("uninitializing engine");
        self.snapshot.stop();
        if self.config.log.flush_at_shutdown {
            self.log.flush();
        }
        self.storages.release_all_volatile();
        self.log.close();

        for pool in &self.pools {
            let stat = pool.stat();
            if stat.free_count != stat.capacity {
                warn!(
                    node = %pool.node(),
                    free = stat.free_count,
                    capacity = stat.capacity,
                    "page pool is missing pages at engine teardown"
                );
            }
        }
        info!("engine uninitialized");
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Returns the log manager.
    #[must_use]
    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Returns the transaction manager.
    #[must_use]
    pub fn xct_manager(&self) -> &Arc<XctManager> {
        &self.xct
    }

    /// Returns the storage manager.
    #[must_use]
    pub fn storage_manager(&self) -> &Arc<StorageManager> {
        &self.storages
    }

    /// Returns the savepoint manager.
    #[must_use]
    pub fn savepoint_manager(&self) -> &Arc<SavepointManager> {
        &self.savepoint
    }

    /// Returns the snapshot manager.
    #[must_use]
    pub fn snapshot_manager(&self) -> &SnapshotManager {
        &self.snapshot
    }

    /// Returns the page pool of the given node.
    #[must_use]
    pub fn page_pool(&self, node: NodeId) -> &Arc<PagePool> {
        &self.pools[node.index()]
    }

    /// Occupancy of every node's page pool.
    #[must_use]
    pub fn pool_stats(&self) -> Vec<PagePoolStat> {
        self.pools.iter().map(|pool| pool.stat()).collect()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_initialized() {
            warn!("engine dropped while initialized; uninitializing");
            let _ = self.uninitialize();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("initialized", &self.is_initialized())
            .field("nodes", &self.pools.len())
            .finish()
    }
}
