//! The transaction manager.
//!
//! Coordinates the transaction lifecycle across workers:
//!
//! - `begin_xct` hands out a fresh [`Xct`] unless the gate is paused
//! - `precommit_xct` validates, applies the write set through the
//!   installed [`WriteApplier`], and stamps the commit epoch
//! - `abort_xct` discards an attempt after a failed precommit
//!
//! The pause gate exists for snapshot pointer installation: while paused,
//! new transactions block, and the snapshot manager waits for the
//! in-flight count to drain before replacing pointers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{Epoch, WorkerId, XctId};
use ferrite_log::LogManager;

use crate::xct::{IsolationLevel, WriteIntent, Xct, XctConfig};

/// The seam through which committed write intents reach storages.
///
/// The storage manager implements this; the engine installs it after both
/// modules exist, keeping this crate free of storage types.
///
/// Commit processing validates every intent before applying any, under
/// the manager's commit lock, so a validation failure (such as an insert
/// colliding with a concurrently committed key) never leaves a
/// half-applied write set behind.
pub trait WriteApplier: Send + Sync {
    /// Checks that the intent can be applied. Runs under the commit lock
    /// immediately before [`apply`]; must not mutate anything.
    ///
    /// [`apply`]: WriteApplier::apply
    fn validate(&self, worker: WorkerId, intent: &WriteIntent) -> FerriteResult<()> {
        let _ = (worker, intent);
        Ok(())
    }

    /// Applies one committed intent on behalf of `worker`.
    fn apply(
        &self,
        worker: WorkerId,
        intent: &WriteIntent,
        epoch: Epoch,
        xct_id: XctId,
    ) -> FerriteResult<()>;
}

/// Gate state shared by workers and the snapshot manager.
struct GateState {
    /// True while pointer installation is in progress.
    paused: bool,
    /// Transactions between begin and finish.
    in_flight: u64,
}

/// The engine-wide transaction manager.
pub struct XctManager {
    log: Arc<LogManager>,
    xct_config: XctConfig,
    applier: RwLock<Option<Arc<dyn WriteApplier>>>,
    next_ordinal: AtomicU32,
    /// Per-worker flag: true between begin and finish.
    running: Vec<AtomicBool>,
    gate: Mutex<GateState>,
    gate_cv: Condvar,
    /// Serializes the validate-and-apply phase of commits.
    commit_mutex: Mutex<()>,
    /// Test hook: the next N precommits fail with a race abort.
    forced_race_aborts: AtomicU32,
}

impl XctManager {
    /// Creates the transaction manager for `total_workers` workers.
    pub fn new(log: Arc<LogManager>, total_workers: u32, xct_config: XctConfig) -> Self {
        let running = (0..total_workers).map(|_| AtomicBool::new(false)).collect();
        Self {
            log,
            xct_config,
            applier: RwLock::new(None),
            next_ordinal: AtomicU32::new(1),
            running,
            gate: Mutex::new(GateState {
                paused: false,
                in_flight: 0,
            }),
            gate_cv: Condvar::new(),
            commit_mutex: Mutex::new(()),
            forced_race_aborts: AtomicU32::new(0),
        }
    }

    /// Installs the write applier. Must happen before the first commit.
    pub fn set_applier(&self, applier: Arc<dyn WriteApplier>) {
        *self.applier.write() = Some(applier);
    }

    /// Begins a transaction for `worker`.
    ///
    /// Blocks while transaction acceptance is paused.
    pub fn begin_xct(&self, worker: WorkerId, isolation: IsolationLevel) -> FerriteResult<Xct> {
        let flag = self.running_flag(worker)?;
        {
            let mut gate = self.gate.lock();
            while gate.paused {
                self.gate_cv.wait(&mut gate);
            }
            gate.in_flight += 1;
        }
        flag.store(true, Ordering::Release);

        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let id = XctId::new(self.log.current_epoch(), ordinal);
        Ok(Xct::new(id, worker, isolation, self.xct_config.clone()))
    }

    /// Attempts to commit the transaction.
    ///
    /// On success the write set is applied, the commit epoch is returned,
    /// and the worker's running flag is cleared. On failure the
    /// transaction stays running and the caller must invoke
    /// [`abort_xct`].
    ///
    /// [`abort_xct`]: XctManager::abort_xct
    pub fn precommit_xct(&self, xct: &mut Xct) -> FerriteResult<Epoch> {
        if !xct.is_active() {
            return Err(FerriteError::internal("precommit of a finished transaction"));
        }
        self.consume_forced_race_abort()?;

        let applier = self
            .applier
            .read()
            .clone()
            .ok_or_else(|| FerriteError::internal("no write applier installed"))?;

        let epoch = self.log.current_epoch();
        {
            let _commit_guard = self.commit_mutex.lock();
            for intent in xct.write_set() {
                applier.validate(xct.worker(), intent)?;
            }
            for intent in xct.write_set() {
                applier.apply(xct.worker(), intent, epoch, xct.id())?;
            }
        }

        xct.mark_committed();
        self.finish(xct.worker())?;
        debug!(worker = %xct.worker(), xct_id = %xct.id(), epoch = %epoch, "transaction committed");
        Ok(epoch)
    }

    /// Aborts a transaction after a failed operation or precommit.
    pub fn abort_xct(&self, xct: &mut Xct) -> FerriteResult<()> {
        if !xct.is_active() {
            return Err(FerriteError::internal("abort of a finished transaction"));
        }
        xct.mark_aborted();
        self.finish(xct.worker())?;
        Ok(())
    }

    /// Returns true while `worker` has a transaction between begin and
    /// finish.
    pub fn is_running_xct(&self, worker: WorkerId) -> bool {
        self.running
            .get(worker.index())
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Stops accepting new transactions.
    pub fn pause_accepting_xct(&self) {
        let mut gate = self.gate.lock();
        gate.paused = true;
        info!("paused transaction acceptance");
    }

    /// Waits until no transaction is in flight, up to `timeout`.
    ///
    /// Returns true when the system quiesced within the bound.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        while gate.in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.gate_cv.wait_for(&mut gate, deadline - now);
        }
        true
    }

    /// Resumes accepting transactions.
    pub fn resume_accepting_xct(&self) {
        let mut gate = self.gate.lock();
        gate.paused = false;
        self.gate_cv.notify_all();
        info!("resumed transaction acceptance");
    }

    /// Number of transactions currently between begin and finish.
    pub fn in_flight(&self) -> u64 {
        self.gate.lock().in_flight
    }

    /// Test hook: the next `count` precommits fail with a race abort.
    pub fn set_forced_race_aborts(&self, count: u32) {
        self.forced_race_aborts.store(count, Ordering::Release);
    }

    fn consume_forced_race_abort(&self) -> FerriteResult<()> {
        let consumed = self
            .forced_race_aborts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            Err(FerriteError::XctRaceAbort)
        } else {
            Ok(())
        }
    }

    fn finish(&self, worker: WorkerId) -> FerriteResult<()> {
        self.running_flag(worker)?.store(false, Ordering::Release);
        let mut gate = self.gate.lock();
        gate.in_flight -= 1;
        self.gate_cv.notify_all();
        Ok(())
    }

    fn running_flag(&self, worker: WorkerId) -> FerriteResult<&AtomicBool> {
        self.running
            .get(worker.index())
            .ok_or_else(|| FerriteError::internal(format!("unknown worker {}", worker)))
    }
}

impl std::fmt::Debug for XctManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gate = self.gate.lock();
        f.debug_struct("XctManager")
            .field("workers", &self.running.len())
            .field("paused", &gate.paused)
            .field("in_flight", &gate.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ferrite_common::config::EngineConfig;
    use ferrite_common::types::StorageId;
    use parking_lot::Mutex as PlMutex;
    use tempfile::TempDir;

    /// Applier that records every intent it sees.
    #[derive(Default)]
    struct RecordingApplier {
        applied: PlMutex<Vec<(WorkerId, Epoch)>>,
        fail_with: PlMutex<Option<FerriteError>>,
    }

    impl WriteApplier for RecordingApplier {
        fn apply(
            &self,
            worker: WorkerId,
            _intent: &WriteIntent,
            epoch: Epoch,
            _xct_id: XctId,
        ) -> FerriteResult<()> {
            if let Some(err) = self.fail_with.lock().take() {
                return Err(err);
            }
            self.applied.lock().push((worker, epoch));
            Ok(())
        }
    }

    fn test_manager() -> (Arc<XctManager>, Arc<RecordingApplier>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default().with_data_root(tmp.path());
        let log = Arc::new(LogManager::new(&config).unwrap());
        let manager = Arc::new(XctManager::new(log, 4, XctConfig::default()));
        let applier = Arc::new(RecordingApplier::default());
        manager.set_applier(applier.clone());
        (manager, applier, tmp)
    }

    fn put_intent() -> WriteIntent {
        WriteIntent::TablePut {
            storage_id: StorageId::new(1),
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            value_offset: 0,
            insert: true,
        }
    }

    #[test]
    fn test_commit_lifecycle() {
        let (manager, applier, _tmp) = test_manager();
        let worker = WorkerId::new(0);

        let mut xct = manager
            .begin_xct(worker, IsolationLevel::Serializable)
            .unwrap();
        assert!(manager.is_running_xct(worker));
        xct.add_write_intent(put_intent()).unwrap();

        let epoch = manager.precommit_xct(&mut xct).unwrap();
        assert!(epoch.is_valid());
        assert!(!manager.is_running_xct(worker));
        assert_eq!(manager.in_flight(), 0);
        assert_eq!(applier.applied.lock().len(), 1);
    }

    #[test]
    fn test_failed_precommit_requires_abort() {
        let (manager, _applier, _tmp) = test_manager();
        let worker = WorkerId::new(1);
        manager.set_forced_race_aborts(1);

        let mut xct = manager
            .begin_xct(worker, IsolationLevel::Serializable)
            .unwrap();
        let err = manager.precommit_xct(&mut xct).unwrap_err();
        assert!(err.is_race_abort());
        // The worker still holds the transaction until it aborts.
        assert!(manager.is_running_xct(worker));

        manager.abort_xct(&mut xct).unwrap();
        assert!(!manager.is_running_xct(worker));
        assert_eq!(manager.in_flight(), 0);
    }

    #[test]
    fn test_forced_race_aborts_are_consumed() {
        let (manager, _applier, _tmp) = test_manager();
        let worker = WorkerId::new(0);
        manager.set_forced_race_aborts(2);

        for _ in 0..2 {
            let mut xct = manager
                .begin_xct(worker, IsolationLevel::Serializable)
                .unwrap();
            assert!(manager.precommit_xct(&mut xct).unwrap_err().is_race_abort());
            manager.abort_xct(&mut xct).unwrap();
        }
        let mut xct = manager
            .begin_xct(worker, IsolationLevel::Serializable)
            .unwrap();
        assert!(manager.precommit_xct(&mut xct).is_ok());
    }

    #[test]
    fn test_applier_error_propagates() {
        let (manager, applier, _tmp) = test_manager();
        let worker = WorkerId::new(0);
        *applier.fail_with.lock() = Some(FerriteError::StrKeyAlreadyExists);

        let mut xct = manager
            .begin_xct(worker, IsolationLevel::Serializable)
            .unwrap();
        xct.add_write_intent(put_intent()).unwrap();
        let err = manager.precommit_xct(&mut xct).unwrap_err();
        assert!(err.is_key_already_exists());
        manager.abort_xct(&mut xct).unwrap();
    }

    #[test]
    fn test_pause_gate_blocks_begin() {
        use std::sync::atomic::AtomicBool as StdBool;
        use std::thread;

        let (manager, _applier, _tmp) = test_manager();
        manager.pause_accepting_xct();

        let began = Arc::new(StdBool::new(false));
        let handle = {
            let manager = Arc::clone(&manager);
            let began = Arc::clone(&began);
            thread::spawn(move || {
                let mut xct = manager
                    .begin_xct(WorkerId::new(2), IsolationLevel::Serializable)
                    .unwrap();
                began.store(true, Ordering::Release);
                manager.abort_xct(&mut xct).unwrap();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!began.load(Ordering::Acquire));

        manager.resume_accepting_xct();
        handle.join().unwrap();
        assert!(began.load(Ordering::Acquire));
    }

    #[test]
    fn test_quiescence_wait() {
        let (manager, _applier, _tmp) = test_manager();
        let worker = WorkerId::new(0);

        // Nothing in flight: immediate success.
        assert!(manager.wait_for_quiescence(Duration::from_millis(10)));

        let mut xct = manager
            .begin_xct(worker, IsolationLevel::Serializable)
            .unwrap();
        assert!(!manager.wait_for_quiescence(Duration::from_millis(20)));
        manager.abort_xct(&mut xct).unwrap();
        assert!(manager.wait_for_quiescence(Duration::from_millis(10)));
    }
}
