//! Page checksum utilities.
//!
//! Uses CRC32C for fast checksumming with hardware acceleration on modern
//! CPUs.

/// Computes a CRC32 checksum for the given data.
#[inline]
#[must_use]
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verifies that the checksum matches the data.
#[inline]
#[must_use]
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

/// Computes a checksum for a page, excluding the checksum field itself.
///
/// Used when finalizing pages: the checksum of everything except the
/// 4-byte checksum field is stored in that field.
#[must_use]
pub fn compute_page_checksum(page_data: &[u8], checksum_offset: usize) -> u32 {
    debug_assert!(checksum_offset + 4 <= page_data.len());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_data[..checksum_offset]);
    hasher.update(&page_data[checksum_offset + 4..]);
    hasher.finalize()
}
