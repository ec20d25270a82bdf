//! The per-logger log mapper.
//!
//! One mapper per (node, logger) drains its log partition up to the
//! snapshot's valid-until epoch, bucketizes the records by destination
//! reducer using the storage's partitioning function, and ships each
//! bucket to the owning node's inbox.
//!
//! Records of storages without valid partitioner metadata (keyed tables
//! are composed by other means) are skipped and counted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use ferrite_common::error::FerriteResult;
use ferrite_common::types::{Epoch, LoggerId, NodeId, StorageId};
use ferrite_log::{LogManager, LogRecord};
use ferrite_storage::StorageManager;

use crate::reducer::{ReducerInbox, Shipment};

/// What one mapper pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperReport {
    /// Records shipped to reducers.
    pub mapped: u64,
    /// Records skipped for lack of partitioner metadata.
    pub skipped: u64,
}

/// The per-(node, logger) mapper.
pub struct LogMapper {
    node: NodeId,
    logger: LoggerId,
    log: Arc<LogManager>,
    storages: Arc<StorageManager>,
    /// One inbox per node, indexed by node id.
    inboxes: Arc<Vec<Arc<ReducerInbox>>>,
}

impl LogMapper {
    /// Creates the mapper for `(node, logger)`.
    #[must_use]
    pub fn new(
        node: NodeId,
        logger: LoggerId,
        log: Arc<LogManager>,
        storages: Arc<StorageManager>,
        inboxes: Arc<Vec<Arc<ReducerInbox>>>,
    ) -> Self {
        Self {
            node,
            logger,
            log,
            storages,
            inboxes,
        }
    }

    /// Returns the node this mapper runs on.
    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the logger this mapper drains.
    #[inline]
    #[must_use]
    pub fn logger(&self) -> LoggerId {
        self.logger
    }

    /// Drains the partition and ships buckets to reducers.
    pub fn map(&self, valid_until: Epoch) -> FerriteResult<MapperReport> {
        let records = self.log.drain_up_to(self.node, self.logger, valid_until)?;
        let mut report = MapperReport::default();
        let mut buckets: HashMap<(usize, StorageId), Vec<LogRecord>> = HashMap::new();

        for record in records {
            let owner = self
                .storages
                .partitioner(record.storage_id)
                .and_then(|p| p.data())
                .map(|data| data.owner_of(record.offset));
            let Some(owner) = owner else {
                report.skipped += 1;
                continue;
            };
            buckets
                .entry((owner.index(), record.storage_id))
                .or_default()
                .push(record);
            report.mapped += 1;
        }

        for ((node_index, storage_id), records) in buckets {
            self.inboxes[node_index].ship(Shipment {
                storage_id,
                records,
            });
        }
        debug!(
            node = %self.node,
            logger = %self.logger,
            mapped = report.mapped,
            skipped = report.skipped,
            "mapper pass complete"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for LogMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMapper")
            .field("node", &self.node)
            .field("logger", &self.logger)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ferrite_common::config::EngineConfig;
    use ferrite_common::constants::PAGE_SIZE;
    use ferrite_common::types::XctId;
    use ferrite_memory::PagePool;
    use tempfile::TempDir;

    struct Fixture {
        log: Arc<LogManager>,
        storages: Arc<StorageManager>,
        inboxes: Arc<Vec<Arc<ReducerInbox>>>,
        _tmp: TempDir,
    }

    fn fixture(groups: u16) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default()
            .with_data_root(tmp.path())
            .with_group_count(groups);
        let log = Arc::new(LogManager::new(&config).unwrap());
        let pools = (0..groups)
            .map(|n| Arc::new(PagePool::new(NodeId::new(n), 512 * PAGE_SIZE as u64).unwrap()))
            .collect();
        let storages =
            Arc::new(StorageManager::new(&config, Arc::clone(&log), pools).unwrap());
        let inboxes = Arc::new(
            (0..groups)
                .map(|_| Arc::new(ReducerInbox::new()))
                .collect::<Vec<_>>(),
        );
        Fixture {
            log,
            storages,
            inboxes,
            _tmp: tmp,
        }
    }

    fn append_overwrite(fx: &Fixture, storage: StorageId, offset: u64, epoch: u64) {
        fx.log
            .append(
                NodeId::new(0),
                LoggerId::new(0),
                LogRecord::overwrite(
                    storage,
                    offset,
                    0,
                    Bytes::from_static(b"v"),
                    Epoch::new(epoch),
                    XctId::new(Epoch::new(epoch), 0),
                ),
            )
            .unwrap();
    }

    #[test]
    fn test_map_ships_to_owner_nodes() {
        let fx = fixture(2);
        // 1600 records, 16 buckets of 100, owners alternating 0/1.
        let array = fx.storages.create_array("a", 64, 1600).unwrap();

        append_overwrite(&fx, array.id(), 50, 1); // bucket 0 -> node 0
        append_overwrite(&fx, array.id(), 150, 1); // bucket 1 -> node 1
        append_overwrite(&fx, array.id(), 250, 1); // bucket 2 -> node 0

        let mapper = LogMapper::new(
            NodeId::new(0),
            LoggerId::new(0),
            Arc::clone(&fx.log),
            Arc::clone(&fx.storages),
            Arc::clone(&fx.inboxes),
        );
        let report = mapper.map(Epoch::new(1)).unwrap();
        assert_eq!(report.mapped, 3);
        assert_eq!(report.skipped, 0);

        let node0: Vec<_> = fx.inboxes[0].take_all();
        let node1: Vec<_> = fx.inboxes[1].take_all();
        assert_eq!(node0.iter().map(|s| s.records.len()).sum::<usize>(), 2);
        assert_eq!(node1.iter().map(|s| s.records.len()).sum::<usize>(), 1);

        fx.storages.release_all_volatile();
    }

    #[test]
    fn test_map_respects_epoch_bound() {
        let fx = fixture(1);
        let array = fx.storages.create_array("a", 64, 1600).unwrap();
        append_overwrite(&fx, array.id(), 0, 1);
        append_overwrite(&fx, array.id(), 1, 5);

        let mapper = LogMapper::new(
            NodeId::new(0),
            LoggerId::new(0),
            Arc::clone(&fx.log),
            Arc::clone(&fx.storages),
            Arc::clone(&fx.inboxes),
        );
        let report = mapper.map(Epoch::new(1)).unwrap();
        assert_eq!(report.mapped, 1);
        // The epoch-5 record stays queued for the next pass.
        assert_eq!(
            fx.log
                .partition_len(NodeId::new(0), LoggerId::new(0))
                .unwrap(),
            1
        );
        fx.storages.release_all_volatile();
    }

    #[test]
    fn test_unpartitioned_storage_is_skipped() {
        let fx = fixture(1);
        // Storage 9 was never created; no partitioner exists.
        append_overwrite(&fx, StorageId::new(9), 0, 1);

        let mapper = LogMapper::new(
            NodeId::new(0),
            LoggerId::new(0),
            Arc::clone(&fx.log),
            Arc::clone(&fx.storages),
            Arc::clone(&fx.inboxes),
        );
        let report = mapper.map(Epoch::new(1)).unwrap();
        assert_eq!(report.mapped, 0);
        assert_eq!(report.skipped, 1);
        assert!(fx.inboxes[0].is_empty());
    }
}
