//! Array storage.
//!
//! A fixed-size array of fixed-length records. The volatile image lives in
//! pool pages using the leaf-page slot layout; after a snapshot installs a
//! root pointer and drops the volatile pages, reads walk the on-disk page
//! tree through a [`SnapshotFileSet`].
//!
//! Overwrites that commit after the volatile image was dropped remain
//! durable in the log and materialize at the next snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{ArrayOffset, NodeId, PagePoolOffset, SnapshotPagePointer, StorageId};
use ferrite_memory::{PageOffsetChunk, PagePool};
use ferrite_xct::{WriteIntent, Xct};

use crate::fileset::SnapshotFileSet;
use crate::page::{child_index, leaf_slot_range, levels_for, records_per_leaf, InteriorView, LeafView};

/// A fixed-size array of fixed-length records.
pub struct ArrayStorage {
    id: StorageId,
    name: String,
    payload_len: u16,
    array_size: ArrayOffset,
    node: NodeId,
    levels: u8,
    per_leaf: u64,
    num_leaf_pages: u64,
    pool: Arc<PagePool>,
    /// Root of the latest snapshot tree; null until the first snapshot.
    root_pointer: AtomicU64,
    /// Leaf-indexed volatile pages; `None` once dropped by a snapshot.
    volatile: Mutex<Option<Vec<PagePoolOffset>>>,
}

impl ArrayStorage {
    /// Creates the storage and grabs its volatile pages from `pool`.
    pub fn create(
        id: StorageId,
        name: impl Into<String>,
        payload_len: u16,
        array_size: ArrayOffset,
        pool: Arc<PagePool>,
    ) -> FerriteResult<Self> {
        if array_size == 0 {
            return Err(FerriteError::invalid_config("array size must be positive"));
        }
        let per_leaf = records_per_leaf(payload_len);
        let num_leaf_pages = array_size.div_ceil(per_leaf);
        let levels = levels_for(array_size, payload_len);
        let name = name.into();

        let mut pages = Vec::with_capacity(num_leaf_pages as usize);
        let mut chunk = PageOffsetChunk::new();
        let mut remaining = num_leaf_pages;
        while remaining > 0 {
            let want = remaining.min(chunk.capacity() as u64);
            if let Err(err) = pool.grab(want, &mut chunk) {
                // Hand back whatever was already grabbed before failing.
                for offset in pages {
                    chunk.push(offset);
                    if chunk.is_full() {
                        pool.release(chunk.size() as u64, &mut chunk);
                    }
                }
                pool.release(chunk.size() as u64, &mut chunk);
                return Err(err);
            }
            for &offset in chunk.as_slice() {
                // SAFETY: freshly grabbed; this storage is the sole holder.
                unsafe {
                    pool.page_mut(offset).fill(0);
                }
                pages.push(offset);
            }
            remaining -= chunk.size() as u64;
            chunk.clear();
        }

        info!(
            storage = %id,
            name = %name,
            records = array_size,
            payload_len,
            leaf_pages = num_leaf_pages,
            levels,
            "created array storage"
        );
        Ok(Self {
            id,
            name,
            payload_len,
            array_size,
            node: pool.node(),
            levels,
            per_leaf,
            num_leaf_pages,
            pool,
            root_pointer: AtomicU64::new(SnapshotPagePointer::NULL.as_u64()),
            volatile: Mutex::new(Some(pages)),
        })
    }

    /// Returns the storage ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> StorageId {
        self.id
    }

    /// Returns the storage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the record payload length.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> u16 {
        self.payload_len
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub fn array_size(&self) -> ArrayOffset {
        self.array_size
    }

    /// Returns the node whose pool backs the volatile image.
    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns the tree level count shared by reads and composition.
    #[inline]
    #[must_use]
    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// Returns the current snapshot root pointer.
    #[must_use]
    pub fn root(&self) -> SnapshotPagePointer {
        SnapshotPagePointer::from_raw(self.root_pointer.load(Ordering::Acquire))
    }

    /// Installs a new snapshot root. Called with transaction execution
    /// paused.
    pub fn install_snapshot_root(&self, root: SnapshotPagePointer) {
        self.root_pointer.store(root.as_u64(), Ordering::Release);
    }

    /// Returns true while the volatile image is present.
    #[must_use]
    pub fn has_volatile(&self) -> bool {
        self.volatile.lock().is_some()
    }

    /// Detaches and returns the volatile pages, leaving the storage
    /// snapshot-backed. Returns an empty vec when already dropped.
    #[must_use]
    pub fn take_volatile_pages(&self) -> Vec<PagePoolOffset> {
        let taken = self.volatile.lock().take().unwrap_or_default();
        debug!(storage = %self.id, pages = taken.len(), "detached volatile pages");
        taken
    }

    /// Reads one record within a transaction.
    pub fn read_record(
        &self,
        xct: &mut Xct,
        offset: ArrayOffset,
        fileset: &SnapshotFileSet,
    ) -> FerriteResult<Vec<u8>> {
        self.check_offset(offset)?;
        let root = self.root();
        xct.add_pointer_access(self.id, root)?;
        xct.add_page_version_access(self.id, offset / self.per_leaf)?;

        let volatile = self.volatile.lock();
        if let Some(pages) = volatile.as_ref() {
            let (start, end) = self.slot_bytes(offset);
            let page = pages[(offset / self.per_leaf) as usize];
            // SAFETY: this storage owns its volatile pages; the lock is held.
            let bytes = unsafe { &self.pool.page(page)[start..end] };
            return Ok(bytes.to_vec());
        }
        drop(volatile);
        self.read_snapshot_record(fileset, offset)
    }

    /// Buffers an overwrite of (part of) one record within a transaction.
    pub fn overwrite_record(
        &self,
        xct: &mut Xct,
        offset: ArrayOffset,
        payload: bytes::Bytes,
        payload_offset: u16,
    ) -> FerriteResult<()> {
        self.check_offset(offset)?;
        if payload_offset as usize + payload.len() > self.payload_len as usize {
            return Err(FerriteError::internal(format!(
                "overwrite of {} bytes at {} exceeds payload length {}",
                payload.len(),
                payload_offset,
                self.payload_len
            )));
        }
        xct.add_pointer_access(self.id, self.root())?;
        xct.add_page_version_access(self.id, offset / self.per_leaf)?;
        xct.add_write_intent(WriteIntent::ArrayOverwrite {
            storage_id: self.id,
            offset,
            payload,
            payload_offset,
        })
    }

    /// Applies a committed overwrite to the volatile image.
    ///
    /// A no-op when the volatile image was dropped by a snapshot; the
    /// write stays durable in the log and reappears at the next snapshot.
    pub fn apply_overwrite(
        &self,
        offset: ArrayOffset,
        payload: &[u8],
        payload_offset: u16,
    ) -> FerriteResult<()> {
        self.check_offset(offset)?;
        let volatile = self.volatile.lock();
        let Some(pages) = volatile.as_ref() else {
            debug!(storage = %self.id, offset, "overwrite after volatile drop; deferred to next snapshot");
            return Ok(());
        };
        let (start, _) = self.slot_bytes(offset);
        let begin = start + payload_offset as usize;
        let page = pages[(offset / self.per_leaf) as usize];
        // SAFETY: this storage owns its volatile pages; the lock is held.
        unsafe {
            self.pool.page_mut(page)[begin..begin + payload.len()].copy_from_slice(payload);
        }
        Ok(())
    }

    /// Reads one record through the snapshot page tree.
    ///
    /// Records never touched by any composed log read as zeroes.
    pub fn read_snapshot_record(
        &self,
        fileset: &SnapshotFileSet,
        offset: ArrayOffset,
    ) -> FerriteResult<Vec<u8>> {
        self.check_offset(offset)?;
        let root = self.root();
        if root.is_null() {
            return Err(FerriteError::internal(format!(
                "array storage {} has neither volatile image nor snapshot root",
                self.id
            )));
        }

        let mut pointer = root;
        let mut buf = vec![0u8; PAGE_SIZE];
        for level in (2..=self.levels).rev() {
            fileset.read_page(pointer, &mut buf)?;
            let interior = InteriorView::new(&buf)?;
            pointer = interior.child(child_index(offset, level, self.payload_len));
            if pointer.is_null() {
                return Ok(vec![0u8; self.payload_len as usize]);
            }
        }

        fileset.read_page(pointer, &mut buf)?;
        let leaf = LeafView::new(&buf, self.payload_len)?;
        Ok(leaf.record(offset % self.per_leaf).to_vec())
    }

    /// Number of leaf pages backing the volatile image.
    #[inline]
    #[must_use]
    pub fn num_leaf_pages(&self) -> u64 {
        self.num_leaf_pages
    }

    fn check_offset(&self, offset: ArrayOffset) -> FerriteResult<()> {
        if offset >= self.array_size {
            return Err(FerriteError::internal(format!(
                "array offset {} out of range (size {})",
                offset, self.array_size
            )));
        }
        Ok(())
    }

    /// Byte range of the record's slot within its (volatile) page.
    fn slot_bytes(&self, offset: ArrayOffset) -> (usize, usize) {
        leaf_slot_range(offset % self.per_leaf, self.payload_len)
    }
}

impl std::fmt::Debug for ArrayStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStorage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("array_size", &self.array_size)
            .field("payload_len", &self.payload_len)
            .field("levels", &self.levels)
            .field("root", &self.root())
            .field("has_volatile", &self.has_volatile())
            .finish()
    }
}
