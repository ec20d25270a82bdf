//! The transactional client loop.
//!
//! Each iteration samples a transaction type from the workload mix,
//! snapshots the PRNG, and enters the abort/retry loop: every retry
//! restores the PRNG snapshot, so a replayed transaction generates
//! exactly the same keys as the attempt that aborted.
//!
//! Aborts are classified: race aborts and set overflows retry silently,
//! key collisions under random inserts count as insert conflicts, and
//! anything else counts as unexpected, turning fatal past a per-worker
//! threshold.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use ferrite_common::constants::MAX_UNEXPECTED_ABORTS;
use ferrite_common::error::FerriteResult;
use ferrite_common::types::WorkerId;
use ferrite_storage::UserTable;
use ferrite_xct::{IsolationLevel, Xct, XctManager};

use crate::workload::{YcsbKey, YcsbRecord, YcsbWorkload, FIELDS, FIELD_LENGTH};
use crate::zipfian::ZipfianRandom;

/// Per-client knobs beyond the workload mix.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The workload mix to run.
    pub workload: YcsbWorkload,
    /// Skew of the Zipfian key selection.
    pub zipfian_theta: f64,
    /// Insert into a uniformly chosen worker's key space instead of the
    /// client's own.
    pub random_inserts: bool,
    /// Read whole records instead of a single field.
    pub read_all_fields: bool,
    /// Write whole records instead of a single field.
    pub write_all_fields: bool,
    /// Seed for the client's PRNG; combined with the worker ID.
    pub rng_seed: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            workload: YcsbWorkload::F,
            zipfian_theta: 0.99,
            random_inserts: false,
            read_all_fields: true,
            write_all_fields: false,
            rng_seed: 1,
        }
    }
}

/// Per-worker outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOutputs {
    /// Transactions committed.
    pub processed: u64,
    /// Retries after a race abort.
    pub race_aborts: u64,
    /// Retries after a pointer/version/read/write set overflow.
    pub largereadset_aborts: u64,
    /// Retries after a key collision under random inserts.
    pub insert_conflict_aborts: u64,
    /// Retries after anything else.
    pub unexpected_aborts: u64,
    /// Scan transactions executed.
    pub total_scans: u64,
    /// Records returned across all scans.
    pub total_scan_length: u64,
}

impl ClientOutputs {
    /// Accumulates another worker's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.processed += other.processed;
        self.race_aborts += other.race_aborts;
        self.largereadset_aborts += other.largereadset_aborts;
        self.insert_conflict_aborts += other.insert_conflict_aborts;
        self.unexpected_aborts += other.unexpected_aborts;
        self.total_scans += other.total_scans;
        self.total_scan_length += other.total_scan_length;
    }
}

/// One workload client, owned by one worker thread.
pub struct YcsbClient {
    worker: WorkerId,
    xct: Arc<XctManager>,
    table: Arc<UserTable>,
    options: ClientOptions,
    total_workers: u32,
    /// Per-worker key counters, shared across all clients.
    key_counters: Arc<Vec<AtomicU32>>,
    rng: SmallRng,
    zipf_high: ZipfianRandom,
    /// Per-high generators, bounded by each worker's key count at client
    /// start.
    zipf_low: Vec<ZipfianRandom>,
    outputs: ClientOutputs,
    stop: Arc<AtomicBool>,
}

impl YcsbClient {
    /// Creates a client for `worker`.
    ///
    /// The per-high Zipfian bounds snapshot the key counters at
    /// construction, so run the load phase first.
    #[must_use]
    pub fn new(
        worker: WorkerId,
        xct: Arc<XctManager>,
        table: Arc<UserTable>,
        options: ClientOptions,
        key_counters: Arc<Vec<AtomicU32>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let total_workers = key_counters.len() as u32;
        let zipf_high = ZipfianRandom::new(u64::from(total_workers), options.zipfian_theta);
        let zipf_low = key_counters
            .iter()
            .map(|counter| {
                ZipfianRandom::new(
                    u64::from(counter.load(Ordering::Acquire).max(1)),
                    options.zipfian_theta,
                )
            })
            .collect();
        let rng = SmallRng::seed_from_u64(options.rng_seed ^ u64::from(worker.as_u32()));
        Self {
            worker,
            xct,
            table,
            options,
            total_workers,
            key_counters,
            rng,
            zipf_high,
            zipf_low,
            outputs: ClientOutputs::default(),
            stop,
        }
    }

    /// Returns the counters accumulated so far.
    #[must_use]
    pub fn outputs(&self) -> &ClientOutputs {
        &self.outputs
    }

    /// Runs iterations until the stop flag is raised.
    pub fn run(&mut self) -> FerriteResult<ClientOutputs> {
        info!(worker = %self.worker, workload = %self.options.workload.desc, "client started");
        while !self.stop.load(Ordering::Acquire) {
            self.run_once()?;
        }
        info!(worker = %self.worker, processed = self.outputs.processed, "client stopped");
        Ok(self.outputs)
    }

    /// Runs one transaction to commit (or fatal error), retrying through
    /// transient aborts with deterministic replay.
    pub fn run_once(&mut self) -> FerriteResult<()> {
        let xct_type = self.rng.gen_range(1..=100u32);
        // Snapshot the PRNG so every retry replays the same keys.
        let rng_at_start = self.rng.clone();

        loop {
            if self.stop.load(Ordering::Acquire) {
                return Ok(());
            }
            self.rng = rng_at_start.clone();

            let mut xct = self
                .xct
                .begin_xct(self.worker, IsolationLevel::Serializable)?;
            let attempt = match self.execute_body(&mut xct, xct_type) {
                Ok(pending) => self.xct.precommit_xct(&mut xct).map(|_| pending),
                Err(err) => Err(err),
            };

            match attempt {
                Ok(pending_inserts) => {
                    debug_assert!(!self.xct.is_running_xct(self.worker));
                    self.advance_key_counters(&pending_inserts);
                    self.outputs.processed += 1;
                    return Ok(());
                }
                Err(err) => {
                    if self.xct.is_running_xct(self.worker) {
                        self.xct.abort_xct(&mut xct)?;
                    }
                    debug_assert!(!self.xct.is_running_xct(self.worker));

                    if err.is_race_abort() {
                        self.outputs.race_aborts += 1;
                    } else if err.is_set_overflow() {
                        self.outputs.largereadset_aborts += 1;
                    } else if self.options.random_inserts && err.is_key_already_exists() {
                        self.outputs.insert_conflict_aborts += 1;
                    } else {
                        self.outputs.unexpected_aborts += 1;
                        warn!(worker = %self.worker, error = %err, "unexpected transaction abort");
                        if self.outputs.unexpected_aborts > MAX_UNEXPECTED_ABORTS {
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Executes the transaction body for the sampled type. Returns the
    /// `high` partitions whose key counter advances if this attempt
    /// commits.
    fn execute_body(&mut self, xct: &mut Xct, xct_type: u32) -> FerriteResult<Vec<u32>> {
        let workload = self.options.workload;
        let mut pending_inserts = Vec::new();

        if xct_type <= workload.insert_percent {
            for _ in 0..workload.reps_per_tx {
                let high = if self.options.random_inserts {
                    self.rng.gen_range(0..self.total_workers)
                } else {
                    self.worker.as_u32()
                };
                // Account for inserts already buffered in this attempt so
                // one transaction never reuses a key.
                let buffered = pending_inserts.iter().filter(|&&h| h == high).count() as u32;
                let low = self.key_counters[high as usize].load(Ordering::Acquire) + buffered;
                self.do_insert(xct, YcsbKey::new(high, low))?;
                pending_inserts.push(high);
            }
        } else if xct_type <= workload.read_percent {
            for _ in 0..workload.reps_per_tx {
                let key = self.zipfian_key();
                self.do_read(xct, key)?;
            }
        } else if xct_type <= workload.update_percent {
            for _ in 0..workload.reps_per_tx {
                let key = self.uniform_key();
                self.do_update(xct, key)?;
            }
        } else if xct_type <= workload.scan_percent {
            for _ in 0..workload.reps_per_tx {
                let length = self.rng.gen_range(1..=workload.max_scan_length);
                let key = self.uniform_key();
                self.outputs.total_scans += 1;
                let records = self.table.scan(xct, &key.to_bytes(), length as usize)?;
                self.outputs.total_scan_length += records.len() as u64;
            }
        } else {
            // Pre-generate all keys and acquire them in sorted order; the
            // same discipline avoids deadlocks under 2PL and keeps OCC
            // measurements comparable.
            let total = workload.reps_per_tx + workload.rmw_additional_reads;
            let mut keys = Vec::with_capacity(total as usize);
            for _ in 0..total {
                keys.push(self.zipfian_key());
            }
            keys.sort_unstable();
            for index in 0..keys.len() {
                if index < workload.reps_per_tx as usize {
                    self.do_rmw(xct, keys[index])?;
                } else {
                    self.do_read(xct, keys[index])?;
                }
            }
        }
        Ok(pending_inserts)
    }

    fn do_insert(&mut self, xct: &mut Xct, key: YcsbKey) -> FerriteResult<()> {
        self.table
            .insert_record(xct, key.to_bytes(), YcsbRecord::new(b'a').to_bytes())
    }

    fn do_read(&mut self, xct: &mut Xct, key: YcsbKey) -> FerriteResult<()> {
        let part = if self.options.read_all_fields {
            None
        } else {
            let field = self.rng.gen_range(0..FIELDS);
            Some((YcsbRecord::field_offset(field), FIELD_LENGTH))
        };
        self.table.get_record(xct, &key.to_bytes(), part)?;
        Ok(())
    }

    fn do_update(&mut self, xct: &mut Xct, key: YcsbKey) -> FerriteResult<()> {
        if self.options.write_all_fields {
            self.table.overwrite_record(
                xct,
                key.to_bytes(),
                YcsbRecord::new(b'b').to_bytes(),
                0,
            )
        } else {
            let field = self.rng.gen_range(0..FIELDS);
            self.table.overwrite_record(
                xct,
                key.to_bytes(),
                Bytes::copy_from_slice(&[b'b'; FIELD_LENGTH]),
                YcsbRecord::field_offset(field) as u16,
            )
        }
    }

    fn do_rmw(&mut self, xct: &mut Xct, key: YcsbKey) -> FerriteResult<()> {
        let part = if self.options.read_all_fields {
            None
        } else {
            let field = self.rng.gen_range(0..FIELDS);
            Some((YcsbRecord::field_offset(field), FIELD_LENGTH))
        };
        self.table.get_record(xct, &key.to_bytes(), part)?;

        if self.options.write_all_fields {
            self.table.overwrite_record(
                xct,
                key.to_bytes(),
                YcsbRecord::new(b'w').to_bytes(),
                0,
            )
        } else {
            let field = self.rng.gen_range(0..FIELDS);
            self.table.overwrite_record(
                xct,
                key.to_bytes(),
                Bytes::copy_from_slice(&[b'w'; FIELD_LENGTH]),
                YcsbRecord::field_offset(field) as u16,
            )
        }
    }

    /// Skewed key pick: a Zipfian high, then a Zipfian low bounded by
    /// that worker's key count.
    fn zipfian_key(&mut self) -> YcsbKey {
        let high = self.zipf_high.next(&mut self.rng) as u32;
        let bound = self.key_counters[high as usize]
            .load(Ordering::Acquire)
            .max(1);
        let low = self.zipf_low[high as usize].next(&mut self.rng) as u32;
        YcsbKey::new(high, low.min(bound - 1))
    }

    /// Uniform key pick within a uniformly chosen worker's key space.
    fn uniform_key(&mut self) -> YcsbKey {
        let high = self.rng.gen_range(0..self.total_workers);
        let bound = self.key_counters[high as usize]
            .load(Ordering::Acquire)
            .max(1);
        let low = self.rng.gen_range(0..bound);
        YcsbKey::new(high, low)
    }

    /// Advances key counters after a commit; holes never appear in the
    /// key space because aborted attempts advance nothing.
    fn advance_key_counters(&self, pending_inserts: &[u32]) {
        for &high in pending_inserts {
            let counter = &self.key_counters[high as usize];
            if self.options.random_inserts {
                // Peers may bump the same counter concurrently.
                counter.fetch_add(1, Ordering::AcqRel);
            } else {
                counter.store(counter.load(Ordering::Relaxed) + 1, Ordering::Release);
            }
        }
    }
}

impl std::fmt::Debug for YcsbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YcsbClient")
            .field("worker", &self.worker)
            .field("workload", &self.options.workload.desc)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// Loads `count` sequential records into `worker`'s key space and sets
/// its key counter, one batch per transaction.
pub fn load_initial_records(
    xct_manager: &XctManager,
    table: &UserTable,
    key_counters: &[AtomicU32],
    worker: WorkerId,
    count: u32,
) -> FerriteResult<()> {
    const LOAD_BATCH: u32 = 1024;

    let mut low = 0;
    while low < count {
        let mut xct = xct_manager.begin_xct(worker, IsolationLevel::Serializable)?;
        let end = (low + LOAD_BATCH).min(count);
        for i in low..end {
            table.insert_record(
                &mut xct,
                YcsbKey::new(worker.as_u32(), i).to_bytes(),
                YcsbRecord::new(b'a').to_bytes(),
            )?;
        }
        xct_manager.precommit_xct(&mut xct)?;
        low = end;
    }
    key_counters[worker.index()].store(count, Ordering::Release);
    Ok(())
}
