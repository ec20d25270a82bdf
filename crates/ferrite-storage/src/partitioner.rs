//! Partitioner metadata.
//!
//! Snapshot mappers bucketize log records by destination reducer using the
//! storage's partitioning function. The metadata is allocated once per
//! storage under a mutex, marked valid, and thereafter read concurrently
//! by every mapper without further locking.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use ferrite_common::types::{ArrayOffset, NodeId, StorageId};

/// Number of partition buckets per array storage.
pub const PARTITION_BUCKETS: usize = 16;

/// Partitioning function data for one array storage.
#[derive(Debug, Clone, Copy)]
pub struct ArrayPartitionerData {
    /// Whether the storage is large enough to partition at all.
    pub partitionable: bool,
    /// Tree levels of the storage.
    pub levels: u8,
    /// Number of records.
    pub array_size: ArrayOffset,
    /// Records per bucket.
    pub bucket_size: u64,
    /// Owning node of each bucket.
    pub bucket_owners: [NodeId; PARTITION_BUCKETS],
}

impl ArrayPartitionerData {
    /// Returns the node owning the bucket `offset` falls into.
    #[must_use]
    pub fn owner_of(&self, offset: ArrayOffset) -> NodeId {
        if !self.partitionable {
            return self.bucket_owners[0];
        }
        let bucket = ((offset / self.bucket_size) as usize).min(PARTITION_BUCKETS - 1);
        self.bucket_owners[bucket]
    }
}

/// Shared partitioner metadata for one storage.
pub struct PartitionerMetadata {
    storage_id: StorageId,
    /// Serializes allocation.
    alloc_mutex: Mutex<()>,
    valid: AtomicBool,
    data: RwLock<Option<ArrayPartitionerData>>,
}

impl PartitionerMetadata {
    /// Creates empty, not-yet-valid metadata.
    #[must_use]
    pub fn new(storage_id: StorageId) -> Self {
        Self {
            storage_id,
            alloc_mutex: Mutex::new(()),
            valid: AtomicBool::new(false),
            data: RwLock::new(None),
        }
    }

    /// Returns the owning storage.
    #[inline]
    #[must_use]
    pub fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    /// Allocates the partitioning data and marks the metadata valid.
    ///
    /// # Panics
    ///
    /// Panics if the metadata was already allocated.
    pub fn allocate(&self, data: ArrayPartitionerData) {
        let _guard = self.alloc_mutex.lock();
        assert!(
            !self.valid.load(Ordering::Relaxed),
            "partitioner metadata allocated twice"
        );
        *self.data.write() = Some(data);
        self.valid.store(true, Ordering::Release);
    }

    /// Returns true once the metadata has been allocated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Returns a copy of the partitioning data, if valid.
    #[must_use]
    pub fn data(&self) -> Option<ArrayPartitionerData> {
        if !self.is_valid() {
            return None;
        }
        *self.data.read()
    }
}

impl std::fmt::Debug for PartitionerMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionerMetadata")
            .field("storage_id", &self.storage_id)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with_owners(nodes: u16) -> ArrayPartitionerData {
        let mut owners = [NodeId::new(0); PARTITION_BUCKETS];
        for (i, owner) in owners.iter_mut().enumerate() {
            *owner = NodeId::new((i as u16) % nodes);
        }
        ArrayPartitionerData {
            partitionable: true,
            levels: 2,
            array_size: 1600,
            bucket_size: 100,
            bucket_owners: owners,
        }
    }

    #[test]
    fn test_allocate_once() {
        let metadata = PartitionerMetadata::new(StorageId::new(1));
        assert!(!metadata.is_valid());
        assert!(metadata.data().is_none());

        metadata.allocate(data_with_owners(2));
        assert!(metadata.is_valid());
        assert!(metadata.data().is_some());
    }

    #[test]
    #[should_panic(expected = "allocated twice")]
    fn test_double_allocate_panics() {
        let metadata = PartitionerMetadata::new(StorageId::new(1));
        metadata.allocate(data_with_owners(2));
        metadata.allocate(data_with_owners(2));
    }

    #[test]
    fn test_owner_of_buckets() {
        let data = data_with_owners(2);
        assert_eq!(data.owner_of(0), NodeId::new(0));
        assert_eq!(data.owner_of(100), NodeId::new(1));
        assert_eq!(data.owner_of(250), NodeId::new(0));
        // Offsets beyond the last bucket clamp to it.
        assert_eq!(data.owner_of(10_000), NodeId::new((15 % 2) as u16));
    }

    #[test]
    fn test_unpartitionable_goes_to_first_owner() {
        let mut data = data_with_owners(4);
        data.partitionable = false;
        assert_eq!(data.owner_of(999), data.bucket_owners[0]);
    }
}
