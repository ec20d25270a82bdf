//! Array storage page layout.
//!
//! An array storage is a static tree: leaf pages hold fixed-length record
//! payloads back to back after the header, interior pages hold child
//! pointers. Both the composer (writing) and the read path share the
//! geometry functions here, so a tree written by one is always readable by
//! the other.

use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::FerriteResult;
use ferrite_common::types::{ArrayOffset, SnapshotPagePointer, StorageId};

use super::header::{
    self, read_count, read_range_begin, PageHeader, PageType, PAGE_HEADER_SIZE,
};

/// Children per interior page.
pub const INTERIOR_FANOUT: u64 = ((PAGE_SIZE - PAGE_HEADER_SIZE) / 8) as u64;

/// Records per leaf page for the given payload length.
///
/// # Panics
///
/// Panics if `payload_len` is zero or larger than a page body.
#[must_use]
pub fn records_per_leaf(payload_len: u16) -> u64 {
    assert!(payload_len > 0, "payload length must be positive");
    let body = PAGE_SIZE - PAGE_HEADER_SIZE;
    assert!(
        payload_len as usize <= body,
        "payload length {} exceeds page body {}",
        payload_len,
        body
    );
    (body / payload_len as usize) as u64
}

/// Number of tree levels needed for `array_size` records.
///
/// Level 1 is the leaf level; a single-leaf array is a one-level tree
/// whose root is the leaf itself.
#[must_use]
pub fn levels_for(array_size: ArrayOffset, payload_len: u16) -> u8 {
    let per_leaf = records_per_leaf(payload_len);
    let mut pages = array_size.div_ceil(per_leaf).max(1);
    let mut levels = 1u8;
    while pages > 1 {
        pages = pages.div_ceil(INTERIOR_FANOUT);
        levels += 1;
    }
    levels
}

/// Records covered by one child of an interior page at `level`.
///
/// Level 2 children are leaves; each added level multiplies the span by
/// the fanout.
#[must_use]
pub fn child_span(level: u8, payload_len: u16) -> u64 {
    debug_assert!(level >= 2);
    records_per_leaf(payload_len) * INTERIOR_FANOUT.pow(u32::from(level) - 2)
}

/// Child slot an array offset falls into within an interior page at
/// `level`.
#[must_use]
pub fn child_index(offset: ArrayOffset, level: u8, payload_len: u16) -> u64 {
    (offset / child_span(level, payload_len)) % INTERIOR_FANOUT
}

/// Validated read-only view over an array leaf page.
pub struct LeafView<'a> {
    data: &'a [u8],
    payload_len: u16,
}

impl<'a> LeafView<'a> {
    /// Validates the page and constructs the view.
    pub fn new(data: &'a [u8], payload_len: u16) -> FerriteResult<Self> {
        header::verify_page(data, PageType::ArrayLeaf)?;
        Ok(Self { data, payload_len })
    }

    /// First array offset covered by this leaf.
    #[must_use]
    pub fn range_begin(&self) -> ArrayOffset {
        read_range_begin(self.data)
    }

    /// Number of records stored in this leaf.
    #[must_use]
    pub fn count(&self) -> u16 {
        read_count(self.data)
    }

    /// Returns the payload of the record in the given slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is beyond the leaf capacity.
    #[must_use]
    pub fn record(&self, slot: u64) -> &'a [u8] {
        let range = leaf_slot_range(slot, self.payload_len);
        &self.data[range.0..range.1]
    }
}

/// Builder over a leaf page buffer.
pub struct LeafBuilder<'a> {
    data: &'a mut [u8],
    payload_len: u16,
}

impl<'a> LeafBuilder<'a> {
    /// Wraps an existing, already-valid leaf image for in-place updates.
    #[must_use]
    pub fn over(data: &'a mut [u8], payload_len: u16) -> Self {
        Self { data, payload_len }
    }

    /// Initializes a fresh leaf page.
    #[must_use]
    pub fn init(
        data: &'a mut [u8],
        storage_id: StorageId,
        range_begin: ArrayOffset,
        count: u16,
        payload_len: u16,
    ) -> Self {
        let mut header = PageHeader::new(data);
        header.initialize(PageType::ArrayLeaf, storage_id, 1, range_begin);
        header.set_count(count);
        Self { data, payload_len }
    }

    /// Writes `bytes` into the record at `slot`, starting `byte_offset`
    /// bytes into the record payload.
    ///
    /// # Panics
    ///
    /// Panics if the write does not fit within the record.
    pub fn write_record(&mut self, slot: u64, byte_offset: u16, bytes: &[u8]) {
        assert!(
            byte_offset as usize + bytes.len() <= self.payload_len as usize,
            "record write out of bounds"
        );
        let (start, _) = leaf_slot_range(slot, self.payload_len);
        let begin = start + byte_offset as usize;
        self.data[begin..begin + bytes.len()].copy_from_slice(bytes);
    }
}

/// Byte range of a leaf slot within a page.
#[inline]
#[must_use]
pub(crate) fn leaf_slot_range(slot: u64, payload_len: u16) -> (usize, usize) {
    let start = PAGE_HEADER_SIZE + slot as usize * payload_len as usize;
    let end = start + payload_len as usize;
    assert!(end <= PAGE_SIZE, "leaf slot {} out of page", slot);
    (start, end)
}

/// Validated read-only view over an array interior page.
pub struct InteriorView<'a> {
    data: &'a [u8],
}

impl<'a> InteriorView<'a> {
    /// Validates the page and constructs the view.
    pub fn new(data: &'a [u8]) -> FerriteResult<Self> {
        header::verify_page(data, PageType::ArrayInterior)?;
        Ok(Self { data })
    }

    /// Number of children stored in this page.
    #[must_use]
    pub fn count(&self) -> u16 {
        read_count(self.data)
    }

    /// Returns the child pointer in the given slot.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is beyond the fanout.
    #[must_use]
    pub fn child(&self, slot: u64) -> SnapshotPagePointer {
        assert!(slot < INTERIOR_FANOUT, "interior slot out of range");
        let start = PAGE_HEADER_SIZE + slot as usize * 8;
        SnapshotPagePointer::from_raw(u64::from_le_bytes(
            self.data[start..start + 8].try_into().expect("slice"),
        ))
    }
}

/// Builder over an interior page buffer.
pub struct InteriorBuilder<'a> {
    data: &'a mut [u8],
    count: u16,
}

impl<'a> InteriorBuilder<'a> {
    /// Initializes a fresh interior page at the given level.
    #[must_use]
    pub fn init(
        data: &'a mut [u8],
        storage_id: StorageId,
        level: u8,
        range_begin: ArrayOffset,
    ) -> Self {
        let mut header = PageHeader::new(data);
        header.initialize(PageType::ArrayInterior, storage_id, level, range_begin);
        Self { data, count: 0 }
    }

    /// Appends a child pointer.
    ///
    /// # Panics
    ///
    /// Panics if the page is full.
    pub fn push_child(&mut self, child: SnapshotPagePointer) {
        assert!((self.count as u64) < INTERIOR_FANOUT, "interior page full");
        let start = PAGE_HEADER_SIZE + self.count as usize * 8;
        self.data[start..start + 8].copy_from_slice(&child.as_u64().to_le_bytes());
        self.count += 1;
        PageHeader::new(self.data).set_count(self.count);
    }

    /// Number of children pushed so far.
    #[must_use]
    pub fn count(&self) -> u16 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::types::{NodeId, SnapshotId};

    #[test]
    fn test_geometry() {
        // 64-byte payloads: (4096 - 32) / 64 = 63 records per leaf.
        assert_eq!(records_per_leaf(64), 63);
        assert_eq!(INTERIOR_FANOUT, 508);

        // Small arrays collapse to a single leaf.
        assert_eq!(levels_for(63, 64), 1);
        assert_eq!(levels_for(64, 64), 2);
        // 4M records x 64 bytes: 66'577 leaves -> 132 interiors -> 1 root.
        assert_eq!(levels_for(1 << 22, 64), 3);
    }

    #[test]
    fn test_child_index() {
        // Level 2: children are leaves of 63 records each.
        assert_eq!(child_index(0, 2, 64), 0);
        assert_eq!(child_index(62, 2, 64), 0);
        assert_eq!(child_index(63, 2, 64), 1);
        // Level 3: each child spans 63 * 508 records.
        assert_eq!(child_index(63 * 508 - 1, 3, 64), 0);
        assert_eq!(child_index(63 * 508, 3, 64), 1);
    }

    #[test]
    fn test_leaf_build_and_read() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut builder = LeafBuilder::init(&mut page, StorageId::new(1), 126, 63, 64);
        builder.write_record(0, 0, &[7u8; 64]);
        builder.write_record(5, 8, &[9u8; 4]);
        PageHeader::new(&mut page).finalize();

        let view = LeafView::new(&page, 64).unwrap();
        assert_eq!(view.range_begin(), 126);
        assert_eq!(view.count(), 63);
        assert_eq!(view.record(0), &[7u8; 64][..]);
        assert_eq!(&view.record(5)[8..12], &[9u8; 4][..]);
        assert_eq!(view.record(1), &[0u8; 64][..]);
    }

    #[test]
    fn test_interior_build_and_read() {
        let mut page = vec![0u8; PAGE_SIZE];
        let ptr_a = SnapshotPagePointer::new(SnapshotId::new(1), NodeId::new(0), 1);
        let ptr_b = SnapshotPagePointer::new(SnapshotId::new(1), NodeId::new(0), 2);
        let mut builder = InteriorBuilder::init(&mut page, StorageId::new(1), 2, 0);
        builder.push_child(ptr_a);
        builder.push_child(ptr_b);
        assert_eq!(builder.count(), 2);
        PageHeader::new(&mut page).finalize();

        let view = InteriorView::new(&page).unwrap();
        assert_eq!(view.count(), 2);
        assert_eq!(view.child(0), ptr_a);
        assert_eq!(view.child(1), ptr_b);
        assert!(view.child(2).is_null());
    }

    #[test]
    fn test_leaf_view_rejects_interior_page() {
        let mut page = vec![0u8; PAGE_SIZE];
        let _ = InteriorBuilder::init(&mut page, StorageId::new(1), 2, 0);
        PageHeader::new(&mut page).finalize();
        assert!(LeafView::new(&page, 64).is_err());
    }
}
