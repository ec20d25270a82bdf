//! Sorted log runs and their k-way merge.
//!
//! Reducers produce one [`SortedRun`] per storage and node; the composer
//! merges all of a storage's runs into a single `(offset, epoch, xct_id)`
//! ordered stream.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ferrite_common::types::{ArrayOffset, Epoch, StorageId, XctId};
use ferrite_log::LogRecord;

/// A run of log records sorted by `(offset, epoch, xct_id)`.
#[derive(Debug)]
pub struct SortedRun {
    storage_id: StorageId,
    records: Vec<LogRecord>,
}

impl SortedRun {
    /// Sorts `records` and wraps them into a run.
    #[must_use]
    pub fn new(storage_id: StorageId, mut records: Vec<LogRecord>) -> Self {
        records.sort_unstable_by_key(LogRecord::sort_key);
        Self {
            storage_id,
            records,
        }
    }

    /// Wraps records that are already sorted.
    #[must_use]
    pub fn from_sorted(storage_id: StorageId, records: Vec<LogRecord>) -> Self {
        debug_assert!(records.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key()));
        Self {
            storage_id,
            records,
        }
    }

    /// Returns the storage these records belong to.
    #[inline]
    #[must_use]
    pub fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    /// Number of records in the run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when the run holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the sorted records.
    #[must_use]
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }
}

/// Cursor into one run, ordered for the merge heap.
#[derive(PartialEq, Eq)]
struct HeapEntry {
    key: (ArrayOffset, Epoch, XctId),
    run: usize,
    pos: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then(self.run.cmp(&other.run))
            .then(self.pos.cmp(&other.pos))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge over several sorted runs.
pub struct MergeRuns<'a> {
    runs: &'a [SortedRun],
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl<'a> Iterator for MergeRuns<'a> {
    type Item = &'a LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(entry) = self.heap.pop()?;
        let run = &self.runs[entry.run];
        if let Some(next) = run.records().get(entry.pos + 1) {
            self.heap.push(Reverse(HeapEntry {
                key: next.sort_key(),
                run: entry.run,
                pos: entry.pos + 1,
            }));
        }
        Some(&run.records()[entry.pos])
    }
}

/// Merges `runs` into one `(offset, epoch, xct_id)` ordered stream.
#[must_use]
pub fn merge_runs(runs: &[SortedRun]) -> MergeRuns<'_> {
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (index, run) in runs.iter().enumerate() {
        if let Some(first) = run.records().first() {
            heap.push(Reverse(HeapEntry {
                key: first.sort_key(),
                run: index,
                pos: 0,
            }));
        }
    }
    MergeRuns { runs, heap }
}
