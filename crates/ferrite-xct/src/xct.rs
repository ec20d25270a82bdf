//! The per-attempt transaction object.
//!
//! An [`Xct`] is ephemeral: created by `begin_xct`, destroyed by a
//! successful `precommit_xct` or by `abort_xct`. It owns four bounded
//! access sets; storages register every access so the commit protocol can
//! validate them, and registration fails with the matching overflow error
//! once a set is full.

use bytes::Bytes;

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{ArrayOffset, SnapshotPagePointer, StorageId, WorkerId, XctId};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Full serializability. The only level this engine offers.
    #[default]
    Serializable,
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XctState {
    /// The transaction can perform operations.
    Active,
    /// The transaction committed.
    Committed,
    /// The transaction was aborted.
    Aborted,
}

/// Capacities of the per-transaction access sets.
#[derive(Debug, Clone)]
pub struct XctConfig {
    /// Maximum records a transaction may read.
    pub max_read_set_size: usize,
    /// Maximum records a transaction may write.
    pub max_write_set_size: usize,
    /// Maximum root pointers a transaction may observe.
    pub max_pointer_set_size: usize,
    /// Maximum page versions a transaction may observe.
    pub max_page_version_set_size: usize,
}

impl Default for XctConfig {
    fn default() -> Self {
        Self {
            max_read_set_size: 32 * 1024,
            max_write_set_size: 16 * 1024,
            max_pointer_set_size: 1024,
            max_page_version_set_size: 1024,
        }
    }
}

/// A read recorded by a storage operation.
#[derive(Debug, Clone)]
pub struct ReadAccess {
    /// Storage the read hit.
    pub storage_id: StorageId,
    /// Key (or encoded array offset) that was read.
    pub key: Bytes,
}

/// A root-pointer observation recorded during a storage traversal.
#[derive(Debug, Clone)]
pub struct PointerAccess {
    /// Storage whose root was followed.
    pub storage_id: StorageId,
    /// The observed pointer value.
    pub pointer: SnapshotPagePointer,
}

/// A page-version observation recorded during a storage traversal.
#[derive(Debug, Clone)]
pub struct PageVersionAccess {
    /// Storage whose page was visited.
    pub storage_id: StorageId,
    /// Index of the visited page within the storage.
    pub page_index: u64,
}

/// A buffered write, applied only if the transaction commits.
#[derive(Debug, Clone)]
pub enum WriteIntent {
    /// Insert or overwrite a record of a keyed table.
    TablePut {
        /// Target storage.
        storage_id: StorageId,
        /// Record key.
        key: Bytes,
        /// Bytes to write.
        value: Bytes,
        /// Byte offset within the record where the write starts.
        value_offset: u16,
        /// True for an insert (key must not exist), false for an
        /// overwrite (key must exist).
        insert: bool,
    },
    /// Overwrite (part of) an array record.
    ArrayOverwrite {
        /// Target storage.
        storage_id: StorageId,
        /// Record index.
        offset: ArrayOffset,
        /// Bytes to write.
        payload: Bytes,
        /// Byte offset within the record where the write starts.
        payload_offset: u16,
    },
}

/// An in-flight transaction.
pub struct Xct {
    id: XctId,
    worker: WorkerId,
    isolation: IsolationLevel,
    state: XctState,
    read_set: Vec<ReadAccess>,
    write_set: Vec<WriteIntent>,
    pointer_set: Vec<PointerAccess>,
    page_version_set: Vec<PageVersionAccess>,
    config: XctConfig,
}

impl Xct {
    pub(crate) fn new(
        id: XctId,
        worker: WorkerId,
        isolation: IsolationLevel,
        config: XctConfig,
    ) -> Self {
        Self {
            id,
            worker,
            isolation,
            state: XctState::Active,
            read_set: Vec::new(),
            write_set: Vec::new(),
            pointer_set: Vec::new(),
            page_version_set: Vec::new(),
            config,
        }
    }

    /// Returns the transaction ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> XctId {
        self.id
    }

    /// Returns the owning worker.
    #[inline]
    #[must_use]
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Returns the isolation level.
    #[inline]
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> XctState {
        self.state
    }

    /// Returns true while the transaction can perform operations.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == XctState::Active
    }

    /// Registers a read.
    pub fn add_read_access(&mut self, storage_id: StorageId, key: Bytes) -> FerriteResult<()> {
        if self.read_set.len() >= self.config.max_read_set_size {
            return Err(FerriteError::XctReadSetOverflow {
                capacity: self.config.max_read_set_size,
            });
        }
        self.read_set.push(ReadAccess { storage_id, key });
        Ok(())
    }

    /// Registers a buffered write.
    pub fn add_write_intent(&mut self, intent: WriteIntent) -> FerriteResult<()> {
        if self.write_set.len() >= self.config.max_write_set_size {
            return Err(FerriteError::XctWriteSetOverflow {
                capacity: self.config.max_write_set_size,
            });
        }
        self.write_set.push(intent);
        Ok(())
    }

    /// Registers a root-pointer observation.
    pub fn add_pointer_access(
        &mut self,
        storage_id: StorageId,
        pointer: SnapshotPagePointer,
    ) -> FerriteResult<()> {
        if self.pointer_set.len() >= self.config.max_pointer_set_size {
            return Err(FerriteError::XctPointerSetOverflow {
                capacity: self.config.max_pointer_set_size,
            });
        }
        self.pointer_set.push(PointerAccess {
            storage_id,
            pointer,
        });
        Ok(())
    }

    /// Registers a page-version observation.
    pub fn add_page_version_access(
        &mut self,
        storage_id: StorageId,
        page_index: u64,
    ) -> FerriteResult<()> {
        if self.page_version_set.len() >= self.config.max_page_version_set_size {
            return Err(FerriteError::XctPageVersionSetOverflow {
                capacity: self.config.max_page_version_set_size,
            });
        }
        self.page_version_set.push(PageVersionAccess {
            storage_id,
            page_index,
        });
        Ok(())
    }

    /// Returns the read set.
    #[must_use]
    pub fn read_set(&self) -> &[ReadAccess] {
        &self.read_set
    }

    /// Returns the write set.
    #[must_use]
    pub fn write_set(&self) -> &[WriteIntent] {
        &self.write_set
    }

    /// Returns the pointer set.
    #[must_use]
    pub fn pointer_set(&self) -> &[PointerAccess] {
        &self.pointer_set
    }

    /// Returns the page-version set.
    #[must_use]
    pub fn page_version_set(&self) -> &[PageVersionAccess] {
        &self.page_version_set
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = XctState::Committed;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.state = XctState::Aborted;
        self.read_set.clear();
        self.write_set.clear();
        self.pointer_set.clear();
        self.page_version_set.clear();
    }
}

impl std::fmt::Debug for Xct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Xct")
            .field("id", &self.id)
            .field("worker", &self.worker)
            .field("state", &self.state)
            .field("reads", &self.read_set.len())
            .field("writes", &self.write_set.len())
            .field("pointers", &self.pointer_set.len())
            .field("page_versions", &self.page_version_set.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::types::Epoch;

    fn tiny_xct(config: XctConfig) -> Xct {
        Xct::new(
            XctId::new(Epoch::FIRST, 1),
            WorkerId::new(0),
            IsolationLevel::Serializable,
            config,
        )
    }

    #[test]
    fn test_read_set_overflow() {
        let mut xct = tiny_xct(XctConfig {
            max_read_set_size: 2,
            ..Default::default()
        });
        xct.add_read_access(StorageId::new(1), Bytes::from_static(b"a"))
            .unwrap();
        xct.add_read_access(StorageId::new(1), Bytes::from_static(b"b"))
            .unwrap();
        let err = xct
            .add_read_access(StorageId::new(1), Bytes::from_static(b"c"))
            .unwrap_err();
        assert!(matches!(err, FerriteError::XctReadSetOverflow { capacity: 2 }));
    }

    #[test]
    fn test_write_set_overflow() {
        let mut xct = tiny_xct(XctConfig {
            max_write_set_size: 1,
            ..Default::default()
        });
        let intent = WriteIntent::TablePut {
            storage_id: StorageId::new(1),
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            value_offset: 0,
            insert: true,
        };
        xct.add_write_intent(intent.clone()).unwrap();
        let err = xct.add_write_intent(intent).unwrap_err();
        assert!(matches!(err, FerriteError::XctWriteSetOverflow { capacity: 1 }));
    }

    #[test]
    fn test_pointer_and_page_version_overflow() {
        let mut xct = tiny_xct(XctConfig {
            max_pointer_set_size: 1,
            max_page_version_set_size: 1,
            ..Default::default()
        });
        xct.add_pointer_access(StorageId::new(1), SnapshotPagePointer::NULL)
            .unwrap();
        assert!(matches!(
            xct.add_pointer_access(StorageId::new(1), SnapshotPagePointer::NULL),
            Err(FerriteError::XctPointerSetOverflow { capacity: 1 })
        ));
        xct.add_page_version_access(StorageId::new(1), 0).unwrap();
        assert!(matches!(
            xct.add_page_version_access(StorageId::new(1), 1),
            Err(FerriteError::XctPageVersionSetOverflow { capacity: 1 })
        ));
    }

    #[test]
    fn test_abort_clears_sets() {
        let mut xct = tiny_xct(XctConfig::default());
        xct.add_read_access(StorageId::new(1), Bytes::from_static(b"a"))
            .unwrap();
        xct.mark_aborted();
        assert_eq!(xct.state(), XctState::Aborted);
        assert!(xct.read_set().is_empty());
    }
}
