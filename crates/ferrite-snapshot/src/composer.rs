//! The per-storage composer.
//!
//! `compose` consumes one or more sorted log runs for a single array
//! storage and produces (i) new data pages appended to the
//! [`SnapshotWriter`] and (ii) one new root page pointer. Previous
//! snapshot pages are read on demand through the [`SnapshotFileSet`]; a
//! leaf untouched by any log keeps its previous pointer, so unchanged
//! subtrees are carried over without rewriting.
//!
//! `replace_pointers` is the second phase: with transaction execution
//! paused, it installs the new root and detaches the storage's volatile
//! pages into the caller's per-node chunk for bulk release.

use std::collections::HashMap;

use tracing::{debug, info};

use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{ArrayOffset, Epoch, SnapshotPagePointer};
use ferrite_memory::{PageOffsetChunk, PagePool};
use ferrite_storage::page::{
    child_span, records_per_leaf, InteriorBuilder, InteriorView, LeafBuilder, LeafView,
    INTERIOR_FANOUT,
};
use ferrite_storage::{ArrayStorage, SnapshotFileSet};

use crate::log_buffer::{merge_runs, SortedRun};
use crate::writer::SnapshotWriter;

/// What one compose pass produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeReport {
    /// Log records applied.
    pub records_applied: u64,
    /// Leaf pages newly written.
    pub leaves_written: u64,
    /// Leaf pointers carried over from the previous snapshot.
    pub leaves_carried: u64,
    /// Interior pages written.
    pub interiors_written: u64,
}

/// What one replace-pointers pass did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceReport {
    /// Root pointers installed.
    pub installed: u64,
    /// Volatile pages dropped for release.
    pub dropped: u64,
}

/// Resolves previous-snapshot leaf pointers, caching the interior path.
///
/// Composition visits leaves in ascending order, so caching one page per
/// level makes the walk almost free.
struct PrevTreeCursor<'a> {
    fileset: &'a SnapshotFileSet,
    root: SnapshotPagePointer,
    levels: u8,
    /// Per level: (page index at that level, page bytes).
    cache: HashMap<u8, (u64, Vec<u8>)>,
}

impl<'a> PrevTreeCursor<'a> {
    fn new(fileset: &'a SnapshotFileSet, root: SnapshotPagePointer, levels: u8) -> Self {
        Self {
            fileset,
            root,
            levels,
            cache: HashMap::new(),
        }
    }

    /// Pointer of the previous snapshot's leaf `leaf_index`, or null when
    /// no previous snapshot (or no such leaf) exists.
    fn leaf_pointer(&mut self, leaf_index: u64) -> FerriteResult<SnapshotPagePointer> {
        if self.root.is_null() {
            return Ok(SnapshotPagePointer::NULL);
        }
        if self.levels == 1 {
            return Ok(if leaf_index == 0 {
                self.root
            } else {
                SnapshotPagePointer::NULL
            });
        }

        let mut pointer = self.root;
        for level in (2..=self.levels).rev() {
            let page_index = leaf_index / INTERIOR_FANOUT.pow(u32::from(level) - 1);
            let hit = matches!(self.cache.get(&level), Some((index, _)) if *index == page_index);
            if !hit {
                let mut buf = vec![0u8; PAGE_SIZE];
                self.fileset.read_page(pointer, &mut buf)?;
                self.cache.insert(level, (page_index, buf));
            }
            let (_, page) = self.cache.get(&level).expect("just cached");
            let slot = (leaf_index / INTERIOR_FANOUT.pow(u32::from(level) - 2)) % INTERIOR_FANOUT;
            pointer = InteriorView::new(page)?.child(slot);
            if pointer.is_null() {
                return Ok(SnapshotPagePointer::NULL);
            }
        }
        Ok(pointer)
    }
}

/// The array composer.
pub struct ArrayComposer<'a> {
    storage: &'a ArrayStorage,
    fileset: &'a SnapshotFileSet,
}

impl<'a> ArrayComposer<'a> {
    /// Creates a composer for one storage.
    #[must_use]
    pub fn new(storage: &'a ArrayStorage, fileset: &'a SnapshotFileSet) -> Self {
        Self { storage, fileset }
    }

    /// Streams the merged runs onto the previous snapshot and returns the
    /// new root pointer.
    ///
    /// A composer error invalidates the whole snapshot iteration; partial
    /// output in the data file is harmless because the metadata file has
    /// not been written yet.
    pub fn compose(
        &self,
        writer: &mut SnapshotWriter,
        runs: &[SortedRun],
        valid_until: Epoch,
    ) -> FerriteResult<SnapshotPagePointer> {
        let payload_len = self.storage.payload_len();
        let array_size = self.storage.array_size();
        let per_leaf = records_per_leaf(payload_len);
        let num_leaves = array_size.div_ceil(per_leaf);
        let storage_id = self.storage.id();

        let mut report = ComposeReport::default();
        let mut prev = PrevTreeCursor::new(self.fileset, self.storage.root(), self.storage.levels());
        let mut merged = merge_runs(runs)
            .filter(|record| record.epoch <= valid_until)
            .peekable();

        let mut page_buf = vec![0u8; PAGE_SIZE];
        let mut leaf_pointers: Vec<SnapshotPagePointer> = Vec::with_capacity(num_leaves as usize);

        for leaf_index in 0..num_leaves {
            let range_begin: ArrayOffset = leaf_index * per_leaf;
            let range_end = (range_begin + per_leaf).min(array_size);
            let touched = matches!(merged.peek(), Some(record) if record.offset < range_end);
            let prev_pointer = prev.leaf_pointer(leaf_index)?;

            if !touched {
                leaf_pointers.push(prev_pointer);
                report.leaves_carried += 1;
                continue;
            }

            // Base image: the previous snapshot's leaf, or a fresh one.
            if prev_pointer.is_null() {
                page_buf.fill(0);
                let _ = LeafBuilder::init(
                    &mut page_buf,
                    storage_id,
                    range_begin,
                    (range_end - range_begin) as u16,
                    payload_len,
                );
            } else {
                self.fileset.read_page(prev_pointer, &mut page_buf)?;
                LeafView::new(&page_buf, payload_len)?;
            }

            // Apply every log for this leaf in (offset, epoch, xct) order;
            // the last write per record wins.
            let mut builder = LeafBuilder::over(&mut page_buf, payload_len);
            while let Some(record) = merged.peek() {
                if record.offset >= range_end {
                    break;
                }
                debug_assert!(record.offset >= range_begin);
                builder.write_record(
                    record.offset - range_begin,
                    record.payload_offset,
                    &record.payload,
                );
                report.records_applied += 1;
                merged.next();
            }

            leaf_pointers.push(writer.append_page(&mut page_buf)?);
            report.leaves_written += 1;
        }

        if merged.peek().is_some() {
            return Err(FerriteError::internal(
                "composer input contains offsets beyond the array size",
            ));
        }

        // Interior levels, bottom-up: parents are written only after all
        // their children are on disk.
        let mut current = leaf_pointers;
        let mut level = 2u8;
        while current.len() > 1 {
            let mut next =
                Vec::with_capacity(current.len().div_ceil(INTERIOR_FANOUT as usize));
            for (index, children) in current.chunks(INTERIOR_FANOUT as usize).enumerate() {
                page_buf.fill(0);
                let range_begin = index as u64 * INTERIOR_FANOUT * child_span(level, payload_len);
                let mut builder =
                    InteriorBuilder::init(&mut page_buf, storage_id, level, range_begin);
                for &child in children {
                    builder.push_child(child);
                }
                next.push(writer.append_page(&mut page_buf)?);
                report.interiors_written += 1;
            }
            current = next;
            level += 1;
        }

        let root = current[0];
        info!(
            storage = %storage_id,
            records = report.records_applied,
            leaves_written = report.leaves_written,
            leaves_carried = report.leaves_carried,
            interiors = report.interiors_written,
            new_root = %root,
            "composed storage"
        );
        Ok(root)
    }
}

/// Installs `new_root` and detaches the storage's volatile pages into
/// `chunk`, releasing to `pool` whenever the chunk fills.
///
/// Must run inside the manager's pause bracket.
pub fn replace_pointers(
    storage: &ArrayStorage,
    new_root: SnapshotPagePointer,
    chunk: &mut PageOffsetChunk,
    pool: &PagePool,
) -> ReplaceReport {
    storage.install_snapshot_root(new_root);
    let pages = storage.take_volatile_pages();
    let report = ReplaceReport {
        installed: 1,
        dropped: pages.len() as u64,
    };
    for offset in pages {
        chunk.push(offset);
        if chunk.is_full() {
            pool.release(chunk.size() as u64, chunk);
        }
    }
    debug!(
        storage = %storage.id(),
        dropped = report.dropped,
        "installed snapshot root and dropped volatile pages"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    use ferrite_common::config::EngineConfig;
    use ferrite_common::types::{NodeId, SnapshotId, StorageId, XctId};
    use ferrite_log::LogRecord;
    use tempfile::TempDir;

    struct Fixture {
        config: Arc<EngineConfig>,
        pool: Arc<PagePool>,
        _tmp: TempDir,
    }

    fn fixture(pool_pages: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(EngineConfig::default().with_data_root(tmp.path()));
        let pool =
            Arc::new(PagePool::new(NodeId::new(0), pool_pages * PAGE_SIZE as u64).unwrap());
        Fixture {
            config,
            pool,
            _tmp: tmp,
        }
    }

    fn overwrite(storage: StorageId, offset: u64, value: &[u8], epoch: u64, ordinal: u32) -> LogRecord {
        LogRecord::overwrite(
            storage,
            offset,
            0,
            Bytes::copy_from_slice(value),
            Epoch::new(epoch),
            XctId::new(Epoch::new(epoch), ordinal),
        )
    }

    fn release_volatile(storage: &ArrayStorage, pool: &PagePool) {
        let mut chunk = PageOffsetChunk::new();
        for offset in storage.take_volatile_pages() {
            chunk.push(offset);
            if chunk.is_full() {
                pool.release(chunk.size() as u64, &mut chunk);
            }
        }
        pool.release(chunk.size() as u64, &mut chunk);
    }

    /// Composes `runs` for `storage` into a fresh snapshot file and
    /// returns the new root.
    fn compose_once(
        fx: &Fixture,
        storage: &ArrayStorage,
        snapshot_id: SnapshotId,
        runs: &[SortedRun],
        valid_until: u64,
    ) -> SnapshotPagePointer {
        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        let mut writer = SnapshotWriter::new(&fx.config, snapshot_id, NodeId::new(0));
        writer.open().unwrap();
        let composer = ArrayComposer::new(storage, &fileset);
        let root = composer
            .compose(&mut writer, runs, Epoch::new(valid_until))
            .unwrap();
        writer.close().unwrap();
        root
    }

    #[test]
    fn test_compose_single_leaf_array() {
        let fx = fixture(64);
        // 10 records of 16 bytes: one leaf, root == leaf.
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 16, 10, Arc::clone(&fx.pool)).unwrap();

        let runs = [SortedRun::new(
            storage.id(),
            vec![
                overwrite(storage.id(), 3, &[3u8; 16], 1, 0),
                overwrite(storage.id(), 7, &[7u8; 16], 1, 1),
            ],
        )];
        let root = compose_once(&fx, &storage, SnapshotId::new(1), &runs, 1);
        assert!(!root.is_null());

        storage.install_snapshot_root(root);
        release_volatile(&storage, &fx.pool);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        assert_eq!(
            storage.read_snapshot_record(&fileset, 3).unwrap(),
            vec![3u8; 16]
        );
        assert_eq!(
            storage.read_snapshot_record(&fileset, 7).unwrap(),
            vec![7u8; 16]
        );
        // Untouched records read as zeroes.
        assert_eq!(
            storage.read_snapshot_record(&fileset, 0).unwrap(),
            vec![0u8; 16]
        );
    }

    #[test]
    fn test_compose_multi_level_reproduces_all_records() {
        let fx = fixture(256);
        // 64-byte payloads, 200 records: 4 leaves under one interior.
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 64, 200, Arc::clone(&fx.pool)).unwrap();
        assert_eq!(storage.levels(), 2);

        // One overwrite log per record; the value encodes the index.
        let mut records = Vec::new();
        for i in 0..200u64 {
            let mut value = [0u8; 64];
            value[..8].copy_from_slice(&i.to_le_bytes());
            records.push(overwrite(storage.id(), i, &value, 1, i as u32));
        }
        let runs = [SortedRun::new(storage.id(), records)];
        let root = compose_once(&fx, &storage, SnapshotId::new(1), &runs, 1);

        storage.install_snapshot_root(root);
        release_volatile(&storage, &fx.pool);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        for i in 0..200u64 {
            let record = storage.read_snapshot_record(&fileset, i).unwrap();
            assert_eq!(u64::from_le_bytes(record[..8].try_into().unwrap()), i);
        }
    }

    #[test]
    fn test_compose_latest_write_wins() {
        let fx = fixture(64);
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 16, 10, Arc::clone(&fx.pool)).unwrap();

        // Three writes to offset 5 across two runs; the (epoch 2, ord 1)
        // write is the latest.
        let run_a = SortedRun::new(
            storage.id(),
            vec![
                overwrite(storage.id(), 5, &[1u8; 16], 1, 0),
                overwrite(storage.id(), 5, &[3u8; 16], 2, 1),
            ],
        );
        let run_b = SortedRun::new(
            storage.id(),
            vec![overwrite(storage.id(), 5, &[2u8; 16], 2, 0)],
        );
        let root = compose_once(&fx, &storage, SnapshotId::new(1), &[run_a, run_b], 2);

        storage.install_snapshot_root(root);
        release_volatile(&storage, &fx.pool);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        assert_eq!(
            storage.read_snapshot_record(&fileset, 5).unwrap(),
            vec![3u8; 16]
        );
    }

    #[test]
    fn test_compose_skips_future_epochs() {
        let fx = fixture(64);
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 16, 10, Arc::clone(&fx.pool)).unwrap();

        let runs = [SortedRun::new(
            storage.id(),
            vec![
                overwrite(storage.id(), 1, &[1u8; 16], 1, 0),
                overwrite(storage.id(), 1, &[9u8; 16], 5, 0),
            ],
        )];
        let root = compose_once(&fx, &storage, SnapshotId::new(1), &runs, 2);

        storage.install_snapshot_root(root);
        release_volatile(&storage, &fx.pool);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        assert_eq!(
            storage.read_snapshot_record(&fileset, 1).unwrap(),
            vec![1u8; 16]
        );
    }

    #[test]
    fn test_incremental_compose_carries_untouched_leaves() {
        let fx = fixture(256);
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 64, 200, Arc::clone(&fx.pool)).unwrap();

        // First snapshot: write records 0 and 150.
        let runs = [SortedRun::new(
            storage.id(),
            vec![
                overwrite(storage.id(), 0, &[1u8; 64], 1, 0),
                overwrite(storage.id(), 150, &[2u8; 64], 1, 1),
            ],
        )];
        let root1 = compose_once(&fx, &storage, SnapshotId::new(1), &runs, 1);
        storage.install_snapshot_root(root1);

        // Second snapshot: touch only record 0's leaf. Record 150's leaf
        // must be carried over by pointer into the new tree.
        let runs = [SortedRun::new(
            storage.id(),
            vec![overwrite(storage.id(), 1, &[7u8; 64], 2, 0)],
        )];
        let root2 = compose_once(&fx, &storage, SnapshotId::new(2), &runs, 2);
        assert_ne!(root1, root2);
        storage.install_snapshot_root(root2);
        release_volatile(&storage, &fx.pool);

        let fileset = SnapshotFileSet::new(Arc::clone(&fx.config));
        assert_eq!(
            storage.read_snapshot_record(&fileset, 0).unwrap(),
            vec![1u8; 64]
        );
        assert_eq!(
            storage.read_snapshot_record(&fileset, 1).unwrap(),
            vec![7u8; 64]
        );
        // Carried leaf: still points into snapshot 1's file.
        assert_eq!(
            storage.read_snapshot_record(&fileset, 150).unwrap(),
            vec![2u8; 64]
        );
    }

    #[test]
    fn test_replace_pointers_drops_volatile() {
        let fx = fixture(64);
        let storage =
            ArrayStorage::create(StorageId::new(1), "a", 64, 100, Arc::clone(&fx.pool)).unwrap();
        let free_before = fx.pool.stat().free_count;

        let root = SnapshotPagePointer::new(SnapshotId::new(1), NodeId::new(0), 1);
        let mut chunk = PageOffsetChunk::new();
        let report = replace_pointers(&storage, root, &mut chunk, &fx.pool);
        assert_eq!(report.installed, 1);
        assert_eq!(report.dropped, storage.num_leaf_pages());
        assert_eq!(storage.root(), root);
        assert!(!storage.has_volatile());

        fx.pool.release(chunk.size() as u64, &mut chunk);
        assert_eq!(
            fx.pool.stat().free_count,
            free_before + storage.num_leaf_pages()
        );
    }
}
