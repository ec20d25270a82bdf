//! The storage manager.
//!
//! Registry of every storage in the engine, creator of partitioner
//! metadata, and the [`WriteApplier`] through which committed write sets
//! reach storages and the log.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use ferrite_common::config::EngineConfig;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{
    ArrayOffset, Epoch, LoggerId, NodeId, StorageId, WorkerId, XctId,
};
use ferrite_log::{LogManager, LogRecord};
use ferrite_memory::{PageOffsetChunk, PagePool};
use ferrite_xct::{WriteApplier, WriteIntent};

use crate::array::ArrayStorage;
use crate::metadata::StorageMetadata;
use crate::partitioner::{ArrayPartitionerData, PartitionerMetadata, PARTITION_BUCKETS};
use crate::table::{TableKind, UserTable};

/// A handle to one storage of either kind.
#[derive(Clone)]
pub enum StorageRef {
    /// An array storage.
    Array(Arc<ArrayStorage>),
    /// A keyed table.
    Table(Arc<UserTable>),
}

impl StorageRef {
    /// Returns the storage ID.
    #[must_use]
    pub fn id(&self) -> StorageId {
        match self {
            Self::Array(array) => array.id(),
            Self::Table(table) => table.id(),
        }
    }

    /// Returns the storage name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Array(array) => array.name(),
            Self::Table(table) => table.name(),
        }
    }
}

/// The engine-wide storage registry.
pub struct StorageManager {
    log: Arc<LogManager>,
    /// One pool per node, indexed by node id.
    pools: Vec<Arc<PagePool>>,
    group_count: u16,
    threads_per_group: u16,
    loggers_per_node: u16,
    storages: RwLock<BTreeMap<StorageId, StorageRef>>,
    by_name: RwLock<HashMap<String, StorageId>>,
    partitioners: RwLock<HashMap<StorageId, Arc<PartitionerMetadata>>>,
    next_id: AtomicU32,
}

impl StorageManager {
    /// Creates the storage manager.
    pub fn new(
        config: &EngineConfig,
        log: Arc<LogManager>,
        pools: Vec<Arc<PagePool>>,
    ) -> FerriteResult<Self> {
        if pools.len() != usize::from(config.thread.group_count) {
            return Err(FerriteError::invalid_config(format!(
                "expected {} page pools, got {}",
                config.thread.group_count,
                pools.len()
            )));
        }
        Ok(Self {
            log,
            pools,
            group_count: config.thread.group_count,
            threads_per_group: config.thread.thread_count_per_group,
            loggers_per_node: config.log.loggers_per_node,
            storages: RwLock::new(BTreeMap::new()),
            by_name: RwLock::new(HashMap::new()),
            partitioners: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(StorageId::FIRST.as_u32()),
        })
    }

    /// Creates an array storage on its owner node's pool.
    pub fn create_array(
        &self,
        name: impl Into<String>,
        payload_len: u16,
        array_size: ArrayOffset,
    ) -> FerriteResult<Arc<ArrayStorage>> {
        let name = name.into();
        self.check_name_free(&name)?;
        let id = self.issue_id();
        let pool = Arc::clone(&self.pools[self.owner_node(id).index()]);
        let storage = Arc::new(ArrayStorage::create(
            id,
            name.clone(),
            payload_len,
            array_size,
            pool,
        )?);

        // Bucketized partitioning over sixteenths of the key space, owned
        // round-robin across nodes.
        let mut owners = [NodeId::new(0); PARTITION_BUCKETS];
        for (i, owner) in owners.iter_mut().enumerate() {
            *owner = NodeId::new((i % usize::from(self.group_count)) as u16);
        }
        let partitioner = Arc::new(PartitionerMetadata::new(id));
        partitioner.allocate(ArrayPartitionerData {
            partitionable: array_size as usize >= PARTITION_BUCKETS,
            levels: storage.levels(),
            array_size,
            bucket_size: (array_size / PARTITION_BUCKETS as u64).max(1),
            bucket_owners: owners,
        });

        self.partitioners.write().insert(id, partitioner);
        self.register(StorageRef::Array(Arc::clone(&storage)), name);
        Ok(storage)
    }

    /// Creates a keyed table.
    pub fn create_table(
        &self,
        name: impl Into<String>,
        kind: TableKind,
    ) -> FerriteResult<Arc<UserTable>> {
        let name = name.into();
        self.check_name_free(&name)?;
        let id = self.issue_id();
        let table = Arc::new(UserTable::create(id, name.clone(), kind));
        self.register(StorageRef::Table(Arc::clone(&table)), name);
        Ok(table)
    }

    /// Looks up a storage by ID.
    #[must_use]
    pub fn get(&self, id: StorageId) -> Option<StorageRef> {
        self.storages.read().get(&id).cloned()
    }

    /// Looks up an array storage by ID.
    #[must_use]
    pub fn get_array(&self, id: StorageId) -> Option<Arc<ArrayStorage>> {
        match self.get(id)? {
            StorageRef::Array(array) => Some(array),
            StorageRef::Table(_) => None,
        }
    }

    /// Looks up a storage by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<StorageRef> {
        let id = *self.by_name.read().get(name)?;
        self.get(id)
    }

    /// Looks up a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<Arc<UserTable>> {
        match self.get_by_name(name)? {
            StorageRef::Table(table) => Some(table),
            StorageRef::Array(_) => None,
        }
    }

    /// Returns the partitioner metadata of a storage, if any.
    #[must_use]
    pub fn partitioner(&self, id: StorageId) -> Option<Arc<PartitionerMetadata>> {
        self.partitioners.read().get(&id).cloned()
    }

    /// Highest storage ID issued so far; invalid when none.
    #[must_use]
    pub fn largest_storage_id(&self) -> StorageId {
        StorageId::new(self.next_id.load(Ordering::Acquire) - 1)
    }

    /// Clones every storage's metadata, in ID order.
    #[must_use]
    pub fn clone_all_metadata(&self) -> Vec<StorageMetadata> {
        self.storages
            .read()
            .values()
            .map(|storage| match storage {
                StorageRef::Array(array) => StorageMetadata::array(
                    array.id(),
                    array.name(),
                    array.payload_len(),
                    array.array_size(),
                    array.root(),
                ),
                StorageRef::Table(table) => StorageMetadata::table(
                    table.id(),
                    table.name(),
                    table.kind() == TableKind::Ordered,
                ),
            })
            .collect()
    }

    /// Releases every remaining volatile page back to its pool.
    ///
    /// Called at engine teardown so pools receive back all their pages.
    pub fn release_all_volatile(&self) {
        let storages = self.storages.read();
        let mut chunk = PageOffsetChunk::new();
        for storage in storages.values() {
            let StorageRef::Array(array) = storage else {
                continue;
            };
            let pool = &self.pools[array.node().index()];
            let pages = array.take_volatile_pages();
            if pages.is_empty() {
                continue;
            }
            debug!(storage = %array.id(), pages = pages.len(), "releasing volatile pages at teardown");
            for offset in pages {
                chunk.push(offset);
                if chunk.is_full() {
                    pool.release(chunk.size() as u64, &mut chunk);
                }
            }
            pool.release(chunk.size() as u64, &mut chunk);
        }
        info!("released all volatile storage pages");
    }

    /// Node that owns a storage's snapshot file and volatile pool.
    #[must_use]
    pub fn owner_node(&self, id: StorageId) -> NodeId {
        NodeId::new((id.as_u32() % u32::from(self.group_count)) as u16)
    }

    fn issue_id(&self) -> StorageId {
        StorageId::new(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    fn check_name_free(&self, name: &str) -> FerriteResult<()> {
        if self.by_name.read().contains_key(name) {
            return Err(FerriteError::StrKeyAlreadyExists);
        }
        Ok(())
    }

    fn register(&self, storage: StorageRef, name: String) {
        let id = storage.id();
        self.by_name.write().insert(name, id);
        self.storages.write().insert(id, storage);
    }

    /// Maps a worker to its node.
    fn worker_node(&self, worker: WorkerId) -> NodeId {
        NodeId::new((worker.as_u32() / u32::from(self.threads_per_group)) as u16)
    }

    /// Maps a worker to the logger it feeds on its node.
    fn worker_logger(&self, worker: WorkerId) -> LoggerId {
        LoggerId::new((worker.as_u32() % u32::from(self.loggers_per_node)) as u16)
    }
}

impl WriteApplier for StorageManager {
    fn validate(&self, _worker: WorkerId, intent: &WriteIntent) -> FerriteResult<()> {
        match intent {
            WriteIntent::TablePut {
                storage_id,
                key,
                insert,
                ..
            } => {
                let StorageRef::Table(table) = self
                    .get(*storage_id)
                    .ok_or_else(|| FerriteError::internal("write to unknown storage"))?
                else {
                    return Err(FerriteError::internal("table write to a non-table storage"));
                };
                table.check_put(key, *insert)
            }
            // Array overwrites are bounds-checked at registration time.
            WriteIntent::ArrayOverwrite { .. } => Ok(()),
        }
    }

    fn apply(
        &self,
        worker: WorkerId,
        intent: &WriteIntent,
        epoch: Epoch,
        xct_id: XctId,
    ) -> FerriteResult<()> {
        match intent {
            WriteIntent::TablePut {
                storage_id,
                key,
                value,
                value_offset,
                insert,
            } => {
                let StorageRef::Table(table) = self
                    .get(*storage_id)
                    .ok_or_else(|| FerriteError::internal("write to unknown storage"))?
                else {
                    return Err(FerriteError::internal("table write to a non-table storage"));
                };
                table.apply_put(key, value, *value_offset, *insert)
            }
            WriteIntent::ArrayOverwrite {
                storage_id,
                offset,
                payload,
                payload_offset,
            } => {
                let array = self
                    .get_array(*storage_id)
                    .ok_or_else(|| FerriteError::internal("array write to a non-array storage"))?;
                array.apply_overwrite(*offset, payload, *payload_offset)?;
                self.log.append(
                    self.worker_node(worker),
                    self.worker_logger(worker),
                    LogRecord::overwrite(
                        *storage_id,
                        *offset,
                        *payload_offset,
                        payload.clone(),
                        epoch,
                        xct_id,
                    ),
                )
            }
        }
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("storages", &self.storages.read().len())
            .field("group_count", &self.group_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ferrite_common::constants::PAGE_SIZE;
    use ferrite_xct::{IsolationLevel, XctConfig, XctManager};
    use tempfile::TempDir;

    struct Fixture {
        manager: Arc<StorageManager>,
        xct_manager: Arc<XctManager>,
        log: Arc<LogManager>,
        _tmp: TempDir,
    }

    fn fixture(groups: u16) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_data_root(tmp.path())
            .with_group_count(groups);
        let log = Arc::new(LogManager::new(&config).unwrap());
        let pools = (0..groups)
            .map(|n| {
                Arc::new(PagePool::new(NodeId::new(n), 256 * PAGE_SIZE as u64).unwrap())
            })
            .collect();
        let manager =
            Arc::new(StorageManager::new(&config, Arc::clone(&log), pools).unwrap());
        let xct_manager = Arc::new(XctManager::new(
            Arc::clone(&log),
            config.thread.total_workers(),
            XctConfig::default(),
        ));
        xct_manager.set_applier(manager.clone());
        Fixture {
            manager,
            xct_manager,
            log,
            _tmp: tmp,
        }
    }

    #[test]
    fn test_create_and_lookup() {
        let fx = fixture(1);
        let array = fx.manager.create_array("arr", 64, 100).unwrap();
        let table = fx
            .manager
            .create_table("tbl", TableKind::Ordered)
            .unwrap();

        assert_eq!(array.id(), StorageId::new(1));
        assert_eq!(table.id(), StorageId::new(2));
        assert_eq!(fx.manager.largest_storage_id(), StorageId::new(2));
        assert!(fx.manager.get_array(array.id()).is_some());
        assert!(fx.manager.get_table("tbl").is_some());
        assert!(fx.manager.get_by_name("missing").is_none());
        assert!(fx.manager.partitioner(array.id()).is_some());
        assert!(fx.manager.partitioner(table.id()).is_none());

        fx.manager.release_all_volatile();
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let fx = fixture(1);
        fx.manager.create_table("t", TableKind::Ordered).unwrap();
        assert!(fx
            .manager
            .create_table("t", TableKind::Hash)
            .unwrap_err()
            .is_key_already_exists());
    }

    #[test]
    fn test_committed_array_write_reaches_log_and_volatile() {
        let fx = fixture(1);
        let array = fx.manager.create_array("arr", 64, 100).unwrap();

        let mut xct = fx
            .xct_manager
            .begin_xct(WorkerId::new(0), IsolationLevel::Serializable)
            .unwrap();
        array
            .overwrite_record(&mut xct, 42, Bytes::from(vec![5u8; 64]), 0)
            .unwrap();
        fx.xct_manager.precommit_xct(&mut xct).unwrap();

        // The overwrite reached the log partition of worker 0.
        assert_eq!(
            fx.log
                .partition_len(NodeId::new(0), LoggerId::new(0))
                .unwrap(),
            1
        );

        // And the volatile image.
        let config = Arc::new(EngineConfig::default());
        let fileset = crate::fileset::SnapshotFileSet::new(config);
        let mut xct = fx
            .xct_manager
            .begin_xct(WorkerId::new(0), IsolationLevel::Serializable)
            .unwrap();
        let record = array.read_record(&mut xct, 42, &fileset).unwrap();
        assert_eq!(record, vec![5u8; 64]);
        fx.xct_manager.abort_xct(&mut xct).unwrap();

        fx.manager.release_all_volatile();
    }

    #[test]
    fn test_owner_node_round_robin() {
        let fx = fixture(2);
        assert_eq!(fx.manager.owner_node(StorageId::new(1)), NodeId::new(1));
        assert_eq!(fx.manager.owner_node(StorageId::new(2)), NodeId::new(0));
        fx.manager.release_all_volatile();
    }
}
