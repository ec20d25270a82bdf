//! The snapshot manager.
//!
//! Two daemon roles share one control block:
//!
//! - The **master** daemon wakes on a timer or an explicit request,
//!   delegates to a [`LogGleaner`], writes the metadata file, takes a
//!   savepoint, and installs the new root pointers while transaction
//!   execution is briefly paused.
//! - One **child** daemon per node hosts that node's mappers and reducer
//!   and responds to work requests.
//!
//! Within an iteration the order is fixed: glean, write metadata, take
//! savepoint, replace pointers. The savepoint must reflect metadata on
//! disk, and pointer installation must follow the savepoint, so crash
//! recovery never sees installed pointers without metadata.
//!
//! All sleeps are bounded (about 100 ms) so stop requests are noticed
//! promptly. Daemons run iterations to completion on shutdown, except
//! that the gleaner honors cancellation and terminates early.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use ferrite_common::config::EngineConfig;
use ferrite_common::constants::{SNAPSHOT_POLL_INTERVAL_MS, XCT_DRAIN_TIMEOUT_MS};
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{Epoch, NodeId, SnapshotId, SnapshotPagePointer, StorageId};
use ferrite_log::LogManager;
use ferrite_memory::{PageOffsetChunk, PagePool};
use ferrite_storage::StorageManager;
use ferrite_xct::XctManager;

use crate::composer;
use crate::gleaner::{run_child_pass, GleanerControl, LogGleaner};
use crate::metadata::SnapshotMetadata;
use crate::savepoint::SavepointManager;
use crate::snapshot::Snapshot;

/// A named mutex/condvar pair.
///
/// Predicates live in adjacent atomics; waiters poll them around bounded
/// waits, so a missed signal only costs one poll interval.
struct CondPair {
    mutex: Mutex<()>,
    cv: Condvar,
}

impl CondPair {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn wait_for(&self, timeout: Duration) {
        let mut guard = self.mutex.lock();
        self.cv.wait_for(&mut guard, timeout);
    }

    fn signal(&self) {
        let _guard = self.mutex.lock();
        self.cv.notify_one();
    }

    fn broadcast(&self) {
        let _guard = self.mutex.lock();
        self.cv.notify_all();
    }
}

/// Control block shared by the master daemon, the child daemons, and
/// trigger callers.
struct SnapshotControl {
    /// Epoch of the latest completed snapshot; published under
    /// `snapshot_taken`.
    snapshot_epoch: AtomicU64,
    /// ID of the latest completed snapshot.
    previous_snapshot_id: AtomicU16,
    /// Sticky flag consumed by the master daemon.
    immediate_snapshot_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Wakes the master daemon.
    snapshot_wakeup: CondPair,
    /// Wakes the child daemons.
    snapshot_children_wakeup: CondPair,
    /// Broadcast after `snapshot_epoch` advances.
    snapshot_taken: CondPair,
}

struct SnapshotManagerInner {
    config: Arc<EngineConfig>,
    log: Arc<LogManager>,
    xct: Arc<XctManager>,
    storages: Arc<StorageManager>,
    savepoint: Arc<SavepointManager>,
    pools: Vec<Arc<PagePool>>,
    control: SnapshotControl,
    gleaner: Arc<GleanerControl>,
    previous_snapshot_time: Mutex<Instant>,
}

/// The engine-wide snapshot coordinator.
pub struct SnapshotManager {
    inner: Arc<SnapshotManagerInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SnapshotManager {
    /// Creates the snapshot manager.
    ///
    /// Fails with [`FerriteError::DependentModuleUnavailableInit`] when
    /// the log manager is not available, and resumes the latest snapshot
    /// state from the savepoint.
    pub fn new(
        config: Arc<EngineConfig>,
        log: Arc<LogManager>,
        xct: Arc<XctManager>,
        storages: Arc<StorageManager>,
        savepoint: Arc<SavepointManager>,
        pools: Vec<Arc<PagePool>>,
    ) -> FerriteResult<Self> {
        info!("initializing snapshot manager");
        if log.is_closed() {
            return Err(FerriteError::DependentModuleUnavailableInit { module: "log" });
        }

        let latest_id = savepoint.latest_snapshot_id();
        let latest_epoch = savepoint.latest_snapshot_epoch();
        info!(
            snapshot = %latest_id,
            epoch = %latest_epoch,
            "latest snapshot from savepoint"
        );

        let gleaner = Arc::new(GleanerControl::new(
            config.thread.group_count,
            config.log.loggers_per_node,
        ));
        let inner = Arc::new(SnapshotManagerInner {
            control: SnapshotControl {
                snapshot_epoch: AtomicU64::new(latest_epoch.as_u64()),
                previous_snapshot_id: AtomicU16::new(latest_id.as_u16()),
                immediate_snapshot_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                snapshot_wakeup: CondPair::new(),
                snapshot_children_wakeup: CondPair::new(),
                snapshot_taken: CondPair::new(),
            },
            gleaner,
            previous_snapshot_time: Mutex::new(Instant::now()),
            config,
            log,
            xct,
            storages,
            savepoint,
            pools,
        });
        Ok(Self {
            inner,
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Launches the master daemon and one child daemon per node.
    pub fn start(&self) {
        let mut threads = self.threads.lock();
        assert!(threads.is_empty(), "snapshot manager already started");

        let inner = Arc::clone(&self.inner);
        threads.push(std::thread::spawn(move || handle_snapshot(&inner)));

        for node in 0..self.inner.config.thread.group_count {
            let inner = Arc::clone(&self.inner);
            threads.push(std::thread::spawn(move || {
                handle_snapshot_child(&inner, NodeId::new(node));
            }));
        }
    }

    /// Requests shutdown and joins the daemons. Idempotent.
    pub fn stop(&self) {
        self.inner
            .control
            .stop_requested
            .store(true, Ordering::Release);
        self.inner.gleaner.cancel();
        self.inner.control.snapshot_wakeup.broadcast();
        self.inner.control.snapshot_children_wakeup.broadcast();
        self.inner.control.snapshot_taken.broadcast();

        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("snapshot daemon panicked");
            }
        }
    }

    /// Epoch of the latest completed snapshot.
    #[must_use]
    pub fn snapshot_epoch(&self) -> Epoch {
        Epoch::new(self.inner.control.snapshot_epoch.load(Ordering::Acquire))
    }

    /// ID of the latest completed snapshot.
    #[must_use]
    pub fn previous_snapshot_id(&self) -> SnapshotId {
        SnapshotId::new(
            self.inner
                .control
                .previous_snapshot_id
                .load(Ordering::Acquire),
        )
    }

    /// True once shutdown was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.inner.control.stop_requested.load(Ordering::Acquire)
    }

    /// Requests an immediate snapshot.
    ///
    /// A no-op when the current snapshot already covers the durable
    /// epoch. With `wait`, blocks until `snapshot_epoch` advances past
    /// the value observed at entry (or shutdown intervenes).
    pub fn trigger_snapshot_immediate(&self, wait_completion: bool) {
        info!("requesting an immediate snapshot");
        let control = &self.inner.control;
        let before = self.snapshot_epoch();
        let durable = self.inner.log.durable_epoch();
        if before.is_valid() && before == durable {
            info!(durable_epoch = %durable, "current snapshot is already latest");
            return;
        }

        while before == self.snapshot_epoch() && !self.is_stop_requested() {
            control
                .immediate_snapshot_requested
                .store(true, Ordering::Release);
            control.snapshot_wakeup.signal();
            if !wait_completion {
                break;
            }
            debug!(before = %before, "waiting for snapshot completion");
            control
                .snapshot_taken
                .wait_for(Duration::from_millis(SNAPSHOT_POLL_INTERVAL_MS));
        }
        if wait_completion {
            info!(after = %self.snapshot_epoch(), "observed snapshot completion");
        }
    }
}

impl Drop for SnapshotManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("snapshot_epoch", &self.snapshot_epoch())
            .field("previous_snapshot_id", &self.previous_snapshot_id())
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

fn is_stop_requested(inner: &SnapshotManagerInner) -> bool {
    inner.control.stop_requested.load(Ordering::Acquire)
}

/// Master daemon body.
fn handle_snapshot(inner: &Arc<SnapshotManagerInner>) {
    info!("snapshot daemon started");
    while !is_stop_requested(inner) {
        inner
            .control
            .snapshot_wakeup
            .wait_for(Duration::from_millis(SNAPSHOT_POLL_INTERVAL_MS));
        if is_stop_requested(inner) {
            break;
        }

        let durable = inner.log.durable_epoch();
        let previous = Epoch::new(inner.control.snapshot_epoch.load(Ordering::Acquire));
        let interval = inner.config.snapshot.interval();
        let due = inner.previous_snapshot_time.lock().elapsed() >= interval;

        let triggered = if !durable.is_valid() {
            debug!("nothing durable yet; not snapshotting");
            false
        } else if previous.is_valid() && previous == durable {
            debug!(durable_epoch = %durable, "current snapshot is already latest");
            false
        } else if inner
            .control
            .immediate_snapshot_requested
            .swap(false, Ordering::AcqRel)
        {
            info!("immediate snapshot request detected; snapshotting");
            true
        } else if due {
            info!("snapshot interval has elapsed; snapshotting");
            true
        } else {
            false
        };

        if triggered {
            match handle_snapshot_triggered(inner) {
                Ok(snapshot) => info!(snapshot = %snapshot, "snapshot iteration completed"),
                Err(err) => error!(
                    error = %err,
                    "snapshot iteration failed; previous snapshot remains authoritative"
                ),
            }
        } else {
            debug!("snapshotting not triggered; going back to sleep");
        }
    }
    info!("snapshot daemon ended");
}

/// Child daemon body for one node.
fn handle_snapshot_child(inner: &Arc<SnapshotManagerInner>, node: NodeId) {
    info!(node = %node, "child snapshot daemon started");
    let mut previous_id = SnapshotId::NULL;
    while !is_stop_requested(inner) {
        let current_id = inner.gleaner.current_snapshot_id();
        if !inner.gleaner.is_gleaning() || previous_id == current_id {
            inner
                .control
                .snapshot_children_wakeup
                .wait_for(Duration::from_millis(SNAPSHOT_POLL_INTERVAL_MS));
            continue;
        }
        if is_stop_requested(inner) {
            break;
        }

        info!(node = %node, snapshot = %current_id, "child daemon received a gleaning request");
        run_child_pass(node, &inner.config, &inner.log, &inner.storages, &inner.gleaner);
        info!(node = %node, snapshot = %current_id, "child daemon joined mappers and reducer");
        previous_id = current_id;
    }
    info!(node = %node, "child snapshot daemon ended");
}

/// One full snapshot iteration.
fn handle_snapshot_triggered(inner: &Arc<SnapshotManagerInner>) -> FerriteResult<Snapshot> {
    let durable = inner.log.durable_epoch();
    let previous_epoch = Epoch::new(inner.control.snapshot_epoch.load(Ordering::Acquire));
    debug_assert!(durable.is_valid());
    debug_assert!(!previous_epoch.is_valid() || durable > previous_epoch);

    let previous_id =
        SnapshotId::new(inner.control.previous_snapshot_id.load(Ordering::Acquire));
    let id = if previous_id.is_valid() {
        previous_id.next()
    } else {
        SnapshotId::FIRST
    };
    let snapshot = Snapshot {
        id,
        base_epoch: previous_epoch,
        valid_until_epoch: durable,
        max_storage_id: inner.storages.largest_storage_id(),
    };
    info!(
        snapshot = %snapshot,
        durable_epoch = %durable,
        "taking a new snapshot"
    );

    // Order matters: glean, metadata, savepoint, replace.
    let new_root_page_pointers = glean_logs(inner, &snapshot)?;
    snapshot_metadata(inner, &snapshot, &new_root_page_pointers)?;
    inner
        .savepoint
        .take_savepoint_after_snapshot(snapshot.id, snapshot.valid_until_epoch)?;
    replace_pointers(inner, &new_root_page_pointers)?;

    inner
        .control
        .previous_snapshot_id
        .store(snapshot.id.as_u16(), Ordering::Release);
    *inner.previous_snapshot_time.lock() = Instant::now();

    // Publish the new epoch and notify waiters.
    {
        let _guard = inner.control.snapshot_taken.mutex.lock();
        inner
            .control
            .snapshot_epoch
            .store(snapshot.valid_until_epoch.as_u64(), Ordering::Release);
        inner.control.snapshot_taken.cv.notify_all();
    }
    Ok(snapshot)
}

/// Runs the gleaner for this iteration and collects the new root pages.
fn glean_logs(
    inner: &Arc<SnapshotManagerInner>,
    snapshot: &Snapshot,
) -> FerriteResult<BTreeMap<StorageId, SnapshotPagePointer>> {
    let gleaner = LogGleaner::new(
        Arc::clone(&inner.config),
        Arc::clone(&inner.storages),
        Arc::clone(&inner.gleaner),
        snapshot.clone(),
    );
    gleaner.execute(&inner.control.stop_requested, || {
        inner.control.snapshot_children_wakeup.broadcast();
    })
}

/// Writes the snapshot metadata file with the new root pages installed.
fn snapshot_metadata(
    inner: &Arc<SnapshotManagerInner>,
    snapshot: &Snapshot,
    new_roots: &BTreeMap<StorageId, SnapshotPagePointer>,
) -> FerriteResult<()> {
    let mut metadata = SnapshotMetadata {
        id: snapshot.id,
        base_epoch: snapshot.base_epoch,
        valid_until_epoch: snapshot.valid_until_epoch,
        largest_storage_id: snapshot.max_storage_id,
        storages: inner.storages.clone_all_metadata(),
    };

    let mut installed = 0usize;
    for storage in &mut metadata.storages {
        if let Some(&root) = new_roots.get(&storage.id) {
            debug_assert_ne!(root, storage.root_snapshot_page_id);
            storage.root_snapshot_page_id = root;
            installed += 1;
        }
    }
    info!(
        total = metadata.storages.len(),
        changed = installed,
        "storages changed their root pages"
    );
    debug_assert_eq!(installed, new_roots.len());

    let folder = inner.config.snapshot.primary_folder();
    std::fs::create_dir_all(&folder).map_err(|source| FerriteError::FsMkdirFailed {
        path: folder.clone(),
        source,
    })?;
    metadata.save_to_file(&inner.config.snapshot.metadata_file_path(snapshot.id))
}

/// Installs new root pointers and drops superseded volatile pages, with
/// transaction execution paused.
fn replace_pointers(
    inner: &Arc<SnapshotManagerInner>,
    new_roots: &BTreeMap<StorageId, SnapshotPagePointer>,
) -> FerriteResult<()> {
    info!("installing new snapshot pointers and dropping volatile pointers");
    let mut dropped_chunks: Vec<PageOffsetChunk> = inner
        .pools
        .iter()
        .map(|_| PageOffsetChunk::new())
        .collect();

    inner.xct.pause_accepting_xct();
    // Let currently running transactions complete; they are never aborted.
    let quiesced = inner
        .xct
        .wait_for_quiescence(Duration::from_millis(XCT_DRAIN_TIMEOUT_MS));
    if !quiesced {
        warn!("in-flight transactions did not drain within the bound; proceeding");
    }

    let mut installed_total = 0u64;
    let mut dropped_total = 0u64;
    let mut failure: Option<FerriteError> = None;
    for (&storage_id, &new_root) in new_roots {
        let Some(array) = inner.storages.get_array(storage_id) else {
            failure = Some(FerriteError::internal(format!(
                "new root for unknown storage {}",
                storage_id
            )));
            break;
        };
        let node = array.node();
        let report = composer::replace_pointers(
            &array,
            new_root,
            &mut dropped_chunks[node.index()],
            &inner.pools[node.index()],
        );
        installed_total += report.installed;
        dropped_total += report.dropped;
    }
    inner.xct.resume_accepting_xct();

    // Bulk-release whatever remains in the per-node chunks.
    for (node_index, chunk) in dropped_chunks.iter_mut().enumerate() {
        if !chunk.is_empty() {
            inner.pools[node_index].release(chunk.size() as u64, chunk);
        }
        debug_assert!(chunk.is_empty());
    }

    info!(
        installed = installed_total,
        dropped = dropped_total,
        "replaced pointers"
    );
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
