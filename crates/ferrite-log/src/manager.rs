//! The log manager.
//!
//! Owns the per-(node, logger) log partitions and the engine's logical
//! clock. Commit processing appends records to a partition; a flush makes
//! everything appended so far durable and advances the durable epoch,
//! which is the upper bound the snapshot pipeline gleans up to.
//!
//! The write-ahead shipping internals (file layout, fsync batching) are
//! not part of this core; partitions are held in memory and handed to the
//! snapshot mappers through [`LogManager::drain_up_to`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use ferrite_common::config::EngineConfig;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{Epoch, LoggerId, NodeId};

use crate::record::LogRecord;

/// Log manager statistics.
#[derive(Debug, Default)]
pub struct LogStats {
    /// Total records appended.
    pub records_appended: AtomicU64,
    /// Total flushes performed.
    pub flushes: AtomicU64,
}

/// The engine-wide log manager.
pub struct LogManager {
    loggers_per_node: u16,
    /// One partition per (node, logger), indexed
    /// `node * loggers_per_node + logger`.
    partitions: Vec<Mutex<Vec<LogRecord>>>,
    /// The engine's logical clock. Commits are stamped with this.
    current_epoch: AtomicU64,
    /// Highest epoch whose records are durable. Advanced by flushes only.
    durable_epoch: AtomicU64,
    stats: LogStats,
    closed: AtomicBool,
}

impl LogManager {
    /// Creates the log manager, creating the configured log folders.
    pub fn new(config: &EngineConfig) -> FerriteResult<Self> {
        let nodes = config.thread.group_count;
        let loggers_per_node = config.log.loggers_per_node;

        let mut partitions = Vec::with_capacity(usize::from(nodes) * usize::from(loggers_per_node));
        for node in 0..nodes {
            for logger in 0..loggers_per_node {
                let folder = config
                    .log
                    .logger_folder(NodeId::new(node), LoggerId::new(logger));
                std::fs::create_dir_all(&folder).map_err(|source| {
                    FerriteError::FsMkdirFailed {
                        path: folder.clone(),
                        source,
                    }
                })?;
                partitions.push(Mutex::new(Vec::new()));
            }
        }

        info!(
            nodes,
            loggers_per_node, "log manager initialized"
        );
        Ok(Self {
            loggers_per_node,
            partitions,
            current_epoch: AtomicU64::new(Epoch::FIRST.as_u64()),
            durable_epoch: AtomicU64::new(Epoch::INVALID.as_u64()),
            stats: LogStats::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the current (not necessarily durable) epoch.
    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        Epoch::new(self.current_epoch.load(Ordering::Acquire))
    }

    /// Advances the logical clock by one tick and returns the new epoch.
    pub fn advance_current_epoch(&self) -> Epoch {
        let next = self.current_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        Epoch::new(next)
    }

    /// Returns the highest durable epoch.
    ///
    /// Readers use acquire semantics so records appended before the
    /// corresponding flush are visible.
    #[must_use]
    pub fn durable_epoch(&self) -> Epoch {
        Epoch::new(self.durable_epoch.load(Ordering::Acquire))
    }

    /// Makes everything appended so far durable: advances the durable
    /// epoch to the current epoch and returns it.
    pub fn flush(&self) -> Epoch {
        let epoch = self.current_epoch.load(Ordering::Acquire);
        self.durable_epoch.store(epoch, Ordering::Release);
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(durable_epoch = epoch, "log flushed");
        Epoch::new(epoch)
    }

    /// Appends a record to the given partition.
    pub fn append(&self, node: NodeId, logger: LoggerId, record: LogRecord) -> FerriteResult<()> {
        self.check_closed()?;
        let partition = self.partition(node, logger)?;
        partition.lock().push(record);
        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends a batch of records to the given partition.
    pub fn append_batch(
        &self,
        node: NodeId,
        logger: LoggerId,
        records: impl IntoIterator<Item = LogRecord>,
    ) -> FerriteResult<()> {
        self.check_closed()?;
        let partition = self.partition(node, logger)?;
        let mut guard = partition.lock();
        let before = guard.len();
        guard.extend(records);
        self.stats
            .records_appended
            .fetch_add((guard.len() - before) as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Removes and returns every record in the partition whose epoch is at
    /// most `epoch`. Records beyond the bound stay queued for the next
    /// snapshot.
    pub fn drain_up_to(
        &self,
        node: NodeId,
        logger: LoggerId,
        epoch: Epoch,
    ) -> FerriteResult<Vec<LogRecord>> {
        let partition = self.partition(node, logger)?;
        let mut guard = partition.lock();
        let mut drained = Vec::new();
        guard.retain(|record| {
            if record.epoch <= epoch {
                drained.push(record.clone());
                false
            } else {
                true
            }
        });
        debug!(
            node = %node,
            logger = %logger,
            drained = drained.len(),
            remaining = guard.len(),
            "drained log partition"
        );
        Ok(drained)
    }

    /// Number of records currently queued in the partition.
    pub fn partition_len(&self, node: NodeId, logger: LoggerId) -> FerriteResult<usize> {
        Ok(self.partition(node, logger)?.lock().len())
    }

    /// Returns log statistics.
    #[must_use]
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Closes the log manager. Appends fail afterwards.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        info!("log manager closed");
    }

    /// Returns true if the log manager has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> FerriteResult<()> {
        if self.is_closed() {
            Err(FerriteError::DependentModuleUnavailableUninit { module: "log" })
        } else {
            Ok(())
        }
    }

    fn partition(&self, node: NodeId, logger: LoggerId) -> FerriteResult<&Mutex<Vec<LogRecord>>> {
        let index = node.index() * usize::from(self.loggers_per_node) + logger.index();
        self.partitions.get(index).ok_or_else(|| {
            FerriteError::internal(format!(
                "no log partition for node {} logger {}",
                node, logger
            ))
        })
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("partitions", &self.partitions.len())
            .field("current_epoch", &self.current_epoch())
            .field("durable_epoch", &self.durable_epoch())
            .field("closed", &self.is_closed())
            .finish()
    }
}
