//! Core identifier types for the ferrite engine.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID kinds. Plain indices that
//! participate in raw memory arithmetic (`PagePoolOffset`, `ArrayOffset`)
//! stay as type aliases.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Epoch;

/// Index of a page within one page pool.
///
/// Offsets below a pool's reserved-page count never refer to usable pages;
/// the pool hands out offsets in `[reserved, pool_size)` only.
pub type PagePoolOffset = u32;

/// Index of a record within an array storage.
pub type ArrayOffset = u64;

/// Storage identifier - uniquely identifies a storage within the engine.
///
/// Storage IDs are assigned sequentially starting at 1 when storages are
/// created; 0 is the invalid sentinel.
///
/// # Example
///
/// ```rust
/// use ferrite_common::types::StorageId;
///
/// let id = StorageId::new(1);
/// assert!(id.is_valid());
/// ```
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct StorageId(u32);

impl StorageId {
    /// Invalid storage ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid storage ID.
    pub const FIRST: Self = Self(1);

    /// Creates a new `StorageId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the next storage ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid storage ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StorageId(INVALID)")
        } else {
            write!(f, "StorageId({})", self.0)
        }
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StorageId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl From<StorageId> for u32 {
    #[inline]
    fn from(id: StorageId) -> Self {
        id.0
    }
}

/// Snapshot identifier.
///
/// Snapshot IDs are issued sequentially starting at 1 by the snapshot
/// manager; 0 means "no snapshot has been taken".
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct SnapshotId(u16);

impl SnapshotId {
    /// "No snapshot" sentinel value.
    pub const NULL: Self = Self(0);

    /// First valid snapshot ID.
    pub const FIRST: Self = Self(1);

    /// Creates a new `SnapshotId` from a raw u16 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the next snapshot ID.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid snapshot ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::NULL.0
    }
}

impl fmt::Debug for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NULL {
            write!(f, "SnapshotId(NULL)")
        } else {
            write!(f, "SnapshotId({})", self.0)
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SnapshotId {
    #[inline]
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// NUMA node identifier.
///
/// Each node hosts its own page pool, snapshot file, log partitions, and
/// reducer. At most 256 nodes can be addressed by a
/// [`SnapshotPagePointer`].
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(u16);

impl NodeId {
    /// Creates a new `NodeId` from a raw u16 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the node ID as a usize, for indexing per-node vectors.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for NodeId {
    #[inline]
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// Logger identifier within one node.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct LoggerId(u16);

impl LoggerId {
    /// Creates a new `LoggerId` from a raw u16 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the logger ID as a usize, for indexing per-logger vectors.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LoggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoggerId({})", self.0)
    }
}

impl fmt::Display for LoggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker (client thread) identifier, global across all nodes.
///
/// Worker `w` runs on node `w / thread_count_per_group` and feeds logger
/// `w % loggers_per_node` on that node.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    /// Creates a new `WorkerId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the worker ID as a usize, for indexing per-worker vectors.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

/// Transaction identifier: the commit epoch combined with an ordinal.
///
/// The epoch occupies the upper 32 bits and a per-engine ordinal the lower
/// 32, so comparing two `XctId`s orders transactions first by epoch and
/// then by issue order. Log records carry the `XctId` of their
/// transaction; when two logs touch the same key in the same epoch, the
/// higher `XctId` wins.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct XctId(u64);

impl XctId {
    /// Invalid transaction ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a transaction ID from an epoch and an ordinal.
    #[inline]
    #[must_use]
    pub const fn new(epoch: Epoch, ordinal: u32) -> Self {
        Self((epoch.as_u64() << 32) | ordinal as u64)
    }

    /// Creates a transaction ID from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the epoch component.
    #[inline]
    #[must_use]
    pub const fn epoch(self) -> Epoch {
        Epoch::new(self.0 >> 32)
    }

    /// Returns the ordinal component.
    #[inline]
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self.0 as u32
    }

    /// Checks if this is a valid transaction ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for XctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "XctId(INVALID)")
        } else {
            write!(f, "XctId(epoch={}, ordinal={})", self.epoch(), self.ordinal())
        }
    }
}

impl fmt::Display for XctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch(), self.ordinal())
    }
}

const POINTER_OFFSET_BITS: u32 = 40;
const POINTER_NODE_BITS: u32 = 8;
const POINTER_OFFSET_MASK: u64 = (1 << POINTER_OFFSET_BITS) - 1;

/// Global identifier of a durable snapshot page.
///
/// Packs the owning snapshot, the node whose snapshot file holds the page,
/// and the page offset within that file into one u64:
///
/// ```text
/// bits 63..48  snapshot id (16 bits)
/// bits 47..40  node        (8 bits)
/// bits 39..0   offset      (40 bits)
/// ```
///
/// The all-zero value is the null pointer; snapshot writers reserve file
/// offset 0 so a valid pointer can never be all-zero.
///
/// # Example
///
/// ```rust
/// use ferrite_common::types::{NodeId, SnapshotId, SnapshotPagePointer};
///
/// let ptr = SnapshotPagePointer::new(SnapshotId::new(3), NodeId::new(1), 42);
/// assert_eq!(ptr.snapshot_id(), SnapshotId::new(3));
/// assert_eq!(ptr.node(), NodeId::new(1));
/// assert_eq!(ptr.offset(), 42);
/// assert!(!ptr.is_null());
/// ```
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct SnapshotPagePointer(u64);

impl SnapshotPagePointer {
    /// The null pointer.
    pub const NULL: Self = Self(0);

    /// Creates a pointer from its components.
    ///
    /// # Panics
    ///
    /// Panics if `node` does not fit in 8 bits or `offset` in 40 bits.
    #[inline]
    #[must_use]
    pub fn new(snapshot_id: SnapshotId, node: NodeId, offset: u64) -> Self {
        assert!(node.as_u16() < (1 << POINTER_NODE_BITS), "node out of range");
        assert!(offset <= POINTER_OFFSET_MASK, "offset out of range");
        Self(
            (u64::from(snapshot_id.as_u16()) << (POINTER_OFFSET_BITS + POINTER_NODE_BITS))
                | (u64::from(node.as_u16()) << POINTER_OFFSET_BITS)
                | offset,
        )
    }

    /// Creates a pointer from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the snapshot ID component.
    #[inline]
    #[must_use]
    pub const fn snapshot_id(self) -> SnapshotId {
        SnapshotId::new((self.0 >> (POINTER_OFFSET_BITS + POINTER_NODE_BITS)) as u16)
    }

    /// Returns the node component.
    #[inline]
    #[must_use]
    pub const fn node(self) -> NodeId {
        NodeId::new(((self.0 >> POINTER_OFFSET_BITS) & ((1 << POINTER_NODE_BITS) - 1)) as u16)
    }

    /// Returns the in-file page offset component.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 & POINTER_OFFSET_MASK
    }

    /// Checks if this is the null pointer.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for SnapshotPagePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "SnapshotPagePointer(NULL)")
        } else {
            write!(
                f,
                "SnapshotPagePointer(snapshot={}, node={}, offset={})",
                self.snapshot_id(),
                self.node(),
                self.offset()
            )
        }
    }
}

impl fmt::Display for SnapshotPagePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_id() {
        let id = StorageId::new(7);
        assert_eq!(id.as_u32(), 7);
        assert!(id.is_valid());
        assert!(!StorageId::INVALID.is_valid());
        assert_eq!(id.next().as_u32(), 8);
    }

    #[test]
    fn test_snapshot_id() {
        let id = SnapshotId::new(1);
        assert!(id.is_valid());
        assert!(!SnapshotId::NULL.is_valid());
        assert_eq!(SnapshotId::NULL.next(), SnapshotId::FIRST);
    }

    #[test]
    fn test_xct_id_ordering() {
        let a = XctId::new(Epoch::new(1), 5);
        let b = XctId::new(Epoch::new(1), 6);
        let c = XctId::new(Epoch::new(2), 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.epoch(), Epoch::new(2));
        assert_eq!(b.ordinal(), 6);
    }

    #[test]
    fn test_snapshot_page_pointer_pack_unpack() {
        let ptr = SnapshotPagePointer::new(SnapshotId::new(12), NodeId::new(3), 0x12345);
        assert_eq!(ptr.snapshot_id(), SnapshotId::new(12));
        assert_eq!(ptr.node(), NodeId::new(3));
        assert_eq!(ptr.offset(), 0x12345);
        assert!(!ptr.is_null());
        assert!(SnapshotPagePointer::NULL.is_null());
    }

    #[test]
    fn test_snapshot_page_pointer_roundtrip_raw() {
        let ptr = SnapshotPagePointer::new(SnapshotId::new(1), NodeId::new(0), 1);
        let raw = ptr.as_u64();
        assert_eq!(SnapshotPagePointer::from_raw(raw), ptr);
    }

    #[test]
    #[should_panic(expected = "offset out of range")]
    fn test_snapshot_page_pointer_offset_overflow() {
        let _ = SnapshotPagePointer::new(SnapshotId::new(1), NodeId::new(0), 1 << 40);
    }

    #[test]
    fn test_worker_node_logger_indexing() {
        assert_eq!(WorkerId::new(9).index(), 9);
        assert_eq!(NodeId::new(2).index(), 2);
        assert_eq!(LoggerId::new(1).index(), 1);
    }
}
