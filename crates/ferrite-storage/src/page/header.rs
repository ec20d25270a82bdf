//! Page header format.
//!
//! Every durable page starts with a 32-byte header:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       2   magic (0x4645 = "FE")
//!   2       1   page_type
//!   3       1   level (1 = leaf)
//!   4       4   storage_id
//!   8       8   page_id (SnapshotPagePointer of this page)
//!  16       8   range_begin (first array offset covered)
//!  24       4   checksum (CRC32 of the page excluding this field)
//!  28       2   count (records in a leaf / children in an interior)
//!  30       2   reserved
//! ```
//!
//! Raw page bytes are never reinterpreted directly; the typed views in
//! [`super::array_page`] validate magic and checksum at construction and
//! are read-only afterwards.

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{ArrayOffset, SnapshotPagePointer, StorageId};

use super::checksum::compute_page_checksum;

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Magic number identifying a ferrite page.
pub const PAGE_MAGIC: u16 = 0x4645; // "FE"

/// Offset of the checksum field in the header.
pub const CHECKSUM_OFFSET: usize = 24;

/// Page type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Uninitialized or reserved page.
    Null = 0,
    /// Array leaf page holding record payloads.
    ArrayLeaf = 1,
    /// Array interior page holding child pointers.
    ArrayInterior = 2,
}

impl PageType {
    /// Decodes a page type byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::ArrayLeaf),
            2 => Some(Self::ArrayInterior),
            _ => None,
        }
    }
}

/// Mutable view over a page's header, used while building a page.
///
/// # Example
///
/// ```rust
/// use ferrite_common::constants::PAGE_SIZE;
/// use ferrite_common::types::StorageId;
/// use ferrite_storage::page::{PageHeader, PageType};
///
/// let mut page = vec![0u8; PAGE_SIZE];
/// let mut header = PageHeader::new(&mut page);
/// header.initialize(PageType::ArrayLeaf, StorageId::new(1), 1, 0);
/// assert_eq!(header.page_type(), Some(PageType::ArrayLeaf));
/// ```
#[derive(Debug)]
pub struct PageHeader<'a> {
    data: &'a mut [u8],
}

impl<'a> PageHeader<'a> {
    /// Creates a header view over the given page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`PAGE_HEADER_SIZE`].
    #[must_use]
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for page header"
        );
        Self { data }
    }

    /// Initializes the header for a fresh page.
    pub fn initialize(
        &mut self,
        page_type: PageType,
        storage_id: StorageId,
        level: u8,
        range_begin: ArrayOffset,
    ) {
        self.data[0..2].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        self.data[2] = page_type as u8;
        self.data[3] = level;
        self.data[4..8].copy_from_slice(&storage_id.as_u32().to_le_bytes());
        self.set_page_id(SnapshotPagePointer::NULL);
        self.data[16..24].copy_from_slice(&range_begin.to_le_bytes());
        self.data[24..28].fill(0);
        self.set_count(0);
        self.data[30..32].fill(0);
    }

    /// Returns the decoded page type.
    #[must_use]
    pub fn page_type(&self) -> Option<PageType> {
        PageType::from_u8(self.data[2])
    }

    /// Sets the page's own durable pointer.
    pub fn set_page_id(&mut self, page_id: SnapshotPagePointer) {
        self.data[8..16].copy_from_slice(&page_id.as_u64().to_le_bytes());
    }

    /// Sets the record/child count.
    pub fn set_count(&mut self, count: u16) {
        self.data[28..30].copy_from_slice(&count.to_le_bytes());
    }

    /// Computes and stores the page checksum. Must be the last header
    /// mutation before the page is written out.
    pub fn finalize(&mut self) {
        let checksum = compute_page_checksum(self.data, CHECKSUM_OFFSET);
        self.data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
    }
}

/// Reads the magic field of a page.
#[inline]
#[must_use]
pub(crate) fn read_magic(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

/// Reads the page type byte.
#[inline]
#[must_use]
pub(crate) fn read_page_type(data: &[u8]) -> u8 {
    data[2]
}

/// Reads the level field.
#[inline]
#[must_use]
pub(crate) fn read_level(data: &[u8]) -> u8 {
    data[3]
}

/// Reads the storage id field.
#[inline]
#[must_use]
pub(crate) fn read_storage_id(data: &[u8]) -> StorageId {
    StorageId::new(u32::from_le_bytes([data[4], data[5], data[6], data[7]]))
}

/// Reads the range_begin field.
#[inline]
#[must_use]
pub(crate) fn read_range_begin(data: &[u8]) -> ArrayOffset {
    u64::from_le_bytes(data[16..24].try_into().expect("header slice"))
}

/// Reads the count field.
#[inline]
#[must_use]
pub(crate) fn read_count(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[28], data[29]])
}

/// Validates a page's magic, type, and checksum.
///
/// Typed read views call this at construction so page bytes are never
/// interpreted without validation.
pub(crate) fn verify_page(data: &[u8], expected_type: PageType) -> FerriteResult<()> {
    if data.len() < PAGE_HEADER_SIZE {
        return Err(FerriteError::internal("page buffer too small"));
    }
    if read_magic(data) != PAGE_MAGIC {
        return Err(FerriteError::internal(format!(
            "bad page magic {:#06x}",
            read_magic(data)
        )));
    }
    if read_page_type(data) != expected_type as u8 {
        return Err(FerriteError::internal(format!(
            "unexpected page type {} (wanted {})",
            read_page_type(data),
            expected_type as u8
        )));
    }
    let stored =
        u32::from_le_bytes(data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().expect("slice"));
    let computed = compute_page_checksum(data, CHECKSUM_OFFSET);
    if stored != computed {
        return Err(FerriteError::internal(format!(
            "page checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored, computed
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::constants::PAGE_SIZE;

    #[test]
    fn test_initialize_and_verify() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut header = PageHeader::new(&mut page);
        header.initialize(PageType::ArrayLeaf, StorageId::new(3), 1, 128);
        header.set_count(63);
        header.finalize();

        assert!(verify_page(&page, PageType::ArrayLeaf).is_ok());
        assert_eq!(read_storage_id(&page), StorageId::new(3));
        assert_eq!(read_range_begin(&page), 128);
        assert_eq!(read_count(&page), 63);
        assert_eq!(read_level(&page), 1);
    }

    #[test]
    fn test_verify_rejects_wrong_type() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut header = PageHeader::new(&mut page);
        header.initialize(PageType::ArrayLeaf, StorageId::new(1), 1, 0);
        header.finalize();
        assert!(verify_page(&page, PageType::ArrayInterior).is_err());
    }

    #[test]
    fn test_verify_rejects_corruption() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut header = PageHeader::new(&mut page);
        header.initialize(PageType::ArrayLeaf, StorageId::new(1), 1, 0);
        header.finalize();
        page[PAGE_SIZE - 1] ^= 0xFF;
        assert!(verify_page(&page, PageType::ArrayLeaf).is_err());
    }

    #[test]
    fn test_verify_rejects_zero_page() {
        let page = vec![0u8; PAGE_SIZE];
        assert!(verify_page(&page, PageType::ArrayLeaf).is_err());
    }
}
