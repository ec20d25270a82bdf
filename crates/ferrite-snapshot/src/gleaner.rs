//! The log gleaner.
//!
//! One gleaner pass converts the durable log tail into snapshot pages.
//! The gleaner itself runs on the snapshot-manager thread; each child
//! daemon launches its node's mappers and reducer as worker threads for
//! the duration of the pass and joins them at its end.
//!
//! Coordination goes through the shared [`GleanerControl`]: mappers on
//! every node must finish shipping before any reducer starts (a reducer
//! receives shipments from all nodes), and the master waits for every
//! node to deliver its sorted runs before composing. On completion the
//! gleaner publishes the map of new root page pointers.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{error, info, warn};

use ferrite_common::config::EngineConfig;
use ferrite_common::constants::SNAPSHOT_POLL_INTERVAL_MS;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{LoggerId, NodeId, SnapshotId, SnapshotPagePointer, StorageId};
use ferrite_log::LogManager;
use ferrite_storage::{SnapshotFileSet, StorageManager};

use crate::composer::ArrayComposer;
use crate::log_buffer::SortedRun;
use crate::mapper::LogMapper;
use crate::reducer::{LogReducer, ReducerInbox};
use crate::snapshot::Snapshot;
use crate::writer::SnapshotWriter;

/// Phase counters of one gleaning pass.
#[derive(Debug, Default)]
struct GleanProgress {
    mappers_done: u32,
    nodes_done: u32,
}

/// Shared state coordinating master, mappers, and reducers.
pub struct GleanerControl {
    total_mappers: u32,
    total_nodes: u32,
    gleaning: AtomicBool,
    cancelled: AtomicBool,
    cur_snapshot: RwLock<Option<Snapshot>>,
    /// One inbox per node, fixed for the engine's lifetime.
    inboxes: Arc<Vec<Arc<ReducerInbox>>>,
    progress: Mutex<GleanProgress>,
    progress_cv: Condvar,
    runs: Mutex<BTreeMap<StorageId, Vec<SortedRun>>>,
    first_error: Mutex<Option<FerriteError>>,
}

impl GleanerControl {
    /// Creates control state for the given topology.
    #[must_use]
    pub fn new(nodes: u16, loggers_per_node: u16) -> Self {
        let inboxes = Arc::new(
            (0..nodes)
                .map(|_| Arc::new(ReducerInbox::new()))
                .collect::<Vec<_>>(),
        );
        Self {
            total_mappers: u32::from(nodes) * u32::from(loggers_per_node),
            total_nodes: u32::from(nodes),
            gleaning: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cur_snapshot: RwLock::new(None),
            inboxes,
            progress: Mutex::new(GleanProgress::default()),
            progress_cv: Condvar::new(),
            runs: Mutex::new(BTreeMap::new()),
            first_error: Mutex::new(None),
        }
    }

    /// True while a pass is between begin and end.
    #[must_use]
    pub fn is_gleaning(&self) -> bool {
        self.gleaning.load(Ordering::Acquire)
    }

    /// True once the current pass should terminate early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Requests early termination of the current pass.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.progress_cv.notify_all();
    }

    /// The snapshot the current (or last) pass is for.
    #[must_use]
    pub fn current_snapshot(&self) -> Option<Snapshot> {
        self.cur_snapshot.read().clone()
    }

    /// ID of the current (or last) pass's snapshot.
    #[must_use]
    pub fn current_snapshot_id(&self) -> SnapshotId {
        self.cur_snapshot
            .read()
            .as_ref()
            .map(|s| s.id)
            .unwrap_or(SnapshotId::NULL)
    }

    /// The mapper-to-reducer inboxes, indexed by node.
    #[must_use]
    pub fn inboxes(&self) -> Arc<Vec<Arc<ReducerInbox>>> {
        Arc::clone(&self.inboxes)
    }

    fn begin_pass(&self, snapshot: Snapshot) {
        for inbox in self.inboxes.iter() {
            inbox.clear();
        }
        *self.runs.lock() = BTreeMap::new();
        *self.first_error.lock() = None;
        *self.progress.lock() = GleanProgress::default();
        self.cancelled.store(false, Ordering::Release);
        *self.cur_snapshot.write() = Some(snapshot);
        self.gleaning.store(true, Ordering::Release);
    }

    fn end_pass(&self) {
        self.gleaning.store(false, Ordering::Release);
    }

    /// Called by each mapper when its partition is fully shipped.
    pub fn mapper_finished(&self) {
        let mut progress = self.progress.lock();
        progress.mappers_done += 1;
        self.progress_cv.notify_all();
    }

    /// Blocks until every mapper on every node finished shipping.
    ///
    /// Returns false when the pass was cancelled instead.
    pub fn wait_all_mappers(&self) -> bool {
        let mut progress = self.progress.lock();
        while progress.mappers_done < self.total_mappers {
            if self.is_cancelled() {
                return false;
            }
            self.progress_cv
                .wait_for(&mut progress, Duration::from_millis(SNAPSHOT_POLL_INTERVAL_MS));
        }
        !self.is_cancelled()
    }

    /// Called by each child daemon with its node's sorted runs.
    pub fn node_finished(&self, runs: Vec<SortedRun>) {
        {
            let mut map = self.runs.lock();
            for run in runs {
                map.entry(run.storage_id()).or_default().push(run);
            }
        }
        let mut progress = self.progress.lock();
        progress.nodes_done += 1;
        self.progress_cv.notify_all();
    }

    /// Records a worker failure and cancels the pass.
    pub fn record_error(&self, err: FerriteError) {
        error!(error = %err, "gleaner worker failed");
        self.first_error.lock().get_or_insert(err);
        self.cancel();
    }

    fn wait_all_nodes(&self, stop: &AtomicBool) -> bool {
        let mut progress = self.progress.lock();
        while progress.nodes_done < self.total_nodes {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            self.progress_cv
                .wait_for(&mut progress, Duration::from_millis(SNAPSHOT_POLL_INTERVAL_MS));
        }
        true
    }

    fn take_error(&self) -> Option<FerriteError> {
        self.first_error.lock().take()
    }

    fn take_runs(&self) -> BTreeMap<StorageId, Vec<SortedRun>> {
        std::mem::take(&mut *self.runs.lock())
    }
}

impl std::fmt::Debug for GleanerControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GleanerControl")
            .field("gleaning", &self.is_gleaning())
            .field("cancelled", &self.is_cancelled())
            .field("snapshot", &self.current_snapshot_id())
            .finish()
    }
}

/// One node's share of a gleaning pass: launch the node's mappers, wait
/// for all nodes' mappers, then reduce. Runs on the child daemon thread.
pub fn run_child_pass(
    node: NodeId,
    config: &Arc<EngineConfig>,
    log: &Arc<LogManager>,
    storages: &Arc<StorageManager>,
    control: &Arc<GleanerControl>,
) {
    let Some(snapshot) = control.current_snapshot() else {
        return;
    };
    let valid_until = snapshot.valid_until_epoch;

    let mut mappers = Vec::new();
    for logger in 0..config.log.loggers_per_node {
        let mapper = LogMapper::new(
            node,
            LoggerId::new(logger),
            Arc::clone(log),
            Arc::clone(storages),
            control.inboxes(),
        );
        let control = Arc::clone(control);
        mappers.push(thread::spawn(move || {
            if let Err(err) = mapper.map(valid_until) {
                control.record_error(err);
            }
            control.mapper_finished();
        }));
    }
    for handle in mappers {
        if handle.join().is_err() {
            control.record_error(FerriteError::internal("mapper thread panicked"));
        }
    }

    // A reducer consumes shipments from every node's mappers, so it may
    // only start once all of them finished.
    if !control.wait_all_mappers() {
        control.node_finished(Vec::new());
        return;
    }

    let inbox = Arc::clone(&control.inboxes()[node.index()]);
    let reducer = LogReducer::new(node);
    let handle = thread::spawn(move || reducer.reduce(&inbox));
    match handle.join() {
        Ok(runs) => control.node_finished(runs),
        Err(_) => {
            control.record_error(FerriteError::internal("reducer thread panicked"));
            control.node_finished(Vec::new());
        }
    }
}

/// The per-iteration gleaner, executed on the snapshot-manager thread.
pub struct LogGleaner {
    config: Arc<EngineConfig>,
    storages: Arc<StorageManager>,
    control: Arc<GleanerControl>,
    snapshot: Snapshot,
}

impl LogGleaner {
    /// Creates the gleaner for one snapshot iteration.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        storages: Arc<StorageManager>,
        control: Arc<GleanerControl>,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            config,
            storages,
            control,
            snapshot,
        }
    }

    /// Runs the full pass: fan out, gather, compose.
    ///
    /// `wake_children` is invoked once the pass is published so the child
    /// daemons start their mappers and reducer.
    pub fn execute(
        &self,
        stop: &AtomicBool,
        wake_children: impl Fn(),
    ) -> FerriteResult<BTreeMap<StorageId, SnapshotPagePointer>> {
        info!(snapshot = %self.snapshot, "log gleaner started");
        self.control.begin_pass(self.snapshot.clone());
        wake_children();

        if !self.control.wait_all_nodes(stop) {
            self.control.cancel();
            self.control.end_pass();
            return Err(FerriteError::Cancelled);
        }
        if let Some(err) = self.control.take_error() {
            self.control.end_pass();
            return Err(err);
        }

        let runs = self.control.take_runs();
        let result = self.compose_all(runs);
        self.control.end_pass();
        if let Ok(roots) = &result {
            info!(
                snapshot = %self.snapshot,
                storages = roots.len(),
                "log gleaner finished"
            );
        }
        result
    }

    /// Feeds each storage's sorted runs to its composer, one snapshot
    /// writer per node.
    fn compose_all(
        &self,
        runs: BTreeMap<StorageId, Vec<SortedRun>>,
    ) -> FerriteResult<BTreeMap<StorageId, SnapshotPagePointer>> {
        let fileset = SnapshotFileSet::new(Arc::clone(&self.config));
        let mut writers: HashMap<NodeId, SnapshotWriter> = HashMap::new();
        let mut roots = BTreeMap::new();
        let mut failure: Option<FerriteError> = None;

        'storages: for (storage_id, storage_runs) in runs {
            if self.control.is_cancelled() {
                failure = Some(FerriteError::Cancelled);
                break;
            }
            let Some(array) = self.storages.get_array(storage_id) else {
                warn!(storage = %storage_id, "runs for an unknown array storage; skipping");
                continue;
            };

            let node = array.node();
            let writer = match writers.entry(node) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let mut writer = SnapshotWriter::new(&self.config, self.snapshot.id, node);
                    if let Err(err) = writer.open() {
                        failure = Some(err);
                        break 'storages;
                    }
                    entry.insert(writer)
                }
            };

            let previous_root = array.root();
            let composer = ArrayComposer::new(&array, &fileset);
            match composer.compose(writer, &storage_runs, self.snapshot.valid_until_epoch) {
                Ok(root) => {
                    // An unchanged root means every log in the pass was
                    // filtered out; nothing to install for this storage.
                    if !root.is_null() && root != previous_root {
                        roots.insert(storage_id, root);
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        for (_, mut writer) in writers {
            if let Err(err) = writer.close() {
                failure.get_or_insert(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(roots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ferrite_common::constants::PAGE_SIZE;
    use ferrite_common::types::{Epoch, XctId};
    use ferrite_log::LogRecord;
    use ferrite_memory::{PageOffsetChunk, PagePool};
    use tempfile::TempDir;

    struct Fixture {
        config: Arc<EngineConfig>,
        log: Arc<LogManager>,
        storages: Arc<StorageManager>,
        pools: Vec<Arc<PagePool>>,
        _tmp: TempDir,
    }

    fn fixture(groups: u16) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(
            EngineConfig::default()
                .with_data_root(tmp.path())
                .with_group_count(groups),
        );
        let log = Arc::new(LogManager::new(&config).unwrap());
        let pools: Vec<_> = (0..groups)
            .map(|n| Arc::new(PagePool::new(NodeId::new(n), 512 * PAGE_SIZE as u64).unwrap()))
            .collect();
        let storages =
            Arc::new(StorageManager::new(&config, Arc::clone(&log), pools.clone()).unwrap());
        Fixture {
            config,
            log,
            storages,
            pools,
            _tmp: tmp,
        }
    }

    fn release_volatile(fx: &Fixture) {
        fx.storages.release_all_volatile();
        for pool in &fx.pools {
            assert_eq!(pool.stat().free_count, pool.capacity());
        }
    }

    fn append(fx: &Fixture, storage: StorageId, offset: u64, value: u8, epoch: u64) {
        fx.log
            .append(
                NodeId::new(0),
                LoggerId::new(0),
                LogRecord::overwrite(
                    storage,
                    offset,
                    0,
                    Bytes::from(vec![value; 64]),
                    Epoch::new(epoch),
                    XctId::new(Epoch::new(epoch), offset as u32),
                ),
            )
            .unwrap();
    }

    #[test]
    fn test_full_pass_produces_roots() {
        let fx = fixture(1);
        let array = fx.storages.create_array("a", 64, 1000).unwrap();
        for i in 0..50 {
            append(&fx, array.id(), i * 17, (i % 250) as u8, 1);
        }

        let control = Arc::new(GleanerControl::new(1, 1));
        let snapshot = Snapshot {
            id: SnapshotId::new(1),
            base_epoch: Epoch::INVALID,
            valid_until_epoch: Epoch::new(1),
            max_storage_id: array.id(),
        };
        let gleaner = LogGleaner::new(
            Arc::clone(&fx.config),
            Arc::clone(&fx.storages),
            Arc::clone(&control),
            snapshot,
        );

        let stop = AtomicBool::new(false);
        let roots = gleaner
            .execute(&stop, || {
                run_child_pass(
                    NodeId::new(0),
                    &fx.config,
                    &fx.log,
                    &fx.storages,
                    &control,
                );
            })
            .unwrap();

        assert_eq!(roots.len(), 1);
        let root = roots[&array.id()];
        assert!(!root.is_null());
        assert!(!control.is_gleaning());

        // The logs were consumed.
        assert_eq!(
            fx.log
                .partition_len(NodeId::new(0), LoggerId::new(0))
                .unwrap(),
            0
        );

        // Reading through the new root reproduces every overwrite.
        array.install_snapshot_root(root);
        let mut chunk = PageOffsetChunk::new();
        for offset in array.take_volatile_pages() {
            chunk.push(offset);
            if chunk.is_full() {
                fx.pools[0].release(chunk.size() as u64, &mut chunk);
            }
        }
        fx.pools[0].release(chunk.size() as u64, &mut chunk);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        for i in 0..50u64 {
            let record = array.read_snapshot_record(&fileset, i * 17).unwrap();
            assert_eq!(record, vec![(i % 250) as u8; 64]);
        }
    }

    #[test]
    fn test_pass_with_no_logs_produces_no_roots() {
        let fx = fixture(1);
        let array = fx.storages.create_array("a", 64, 100).unwrap();

        let control = Arc::new(GleanerControl::new(1, 1));
        let snapshot = Snapshot {
            id: SnapshotId::new(1),
            base_epoch: Epoch::INVALID,
            valid_until_epoch: Epoch::new(1),
            max_storage_id: array.id(),
        };
        let gleaner = LogGleaner::new(
            Arc::clone(&fx.config),
            Arc::clone(&fx.storages),
            Arc::clone(&control),
            snapshot,
        );
        let stop = AtomicBool::new(false);
        let roots = gleaner
            .execute(&stop, || {
                run_child_pass(
                    NodeId::new(0),
                    &fx.config,
                    &fx.log,
                    &fx.storages,
                    &control,
                );
            })
            .unwrap();
        assert!(roots.is_empty());
        release_volatile(&fx);
    }

    #[test]
    fn test_stop_cancels_pass() {
        let fx = fixture(1);
        let control = Arc::new(GleanerControl::new(1, 1));
        let snapshot = Snapshot {
            id: SnapshotId::new(1),
            base_epoch: Epoch::INVALID,
            valid_until_epoch: Epoch::new(1),
            max_storage_id: StorageId::INVALID,
        };
        let gleaner = LogGleaner::new(
            Arc::clone(&fx.config),
            Arc::clone(&fx.storages),
            Arc::clone(&control),
            snapshot,
        );
        // Children never run; a stop request unblocks the wait.
        let stop = AtomicBool::new(true);
        let err = gleaner.execute(&stop, || {}).unwrap_err();
        assert!(matches!(err, FerriteError::Cancelled));
    }
}
