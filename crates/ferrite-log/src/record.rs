//! Log record types.

use bytes::Bytes;

use ferrite_common::types::{ArrayOffset, Epoch, StorageId, XctId};

/// A committed overwrite of (part of) one array record.
///
/// Records are ordered by `(offset, epoch, xct_id)`; when two records hit
/// the same offset, the one with the higher `(epoch, xct_id)` is the later
/// write and wins during composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// The storage this record belongs to.
    pub storage_id: StorageId,
    /// The array record that was overwritten.
    pub offset: ArrayOffset,
    /// Byte offset within the record payload where the write starts. Zero
    /// with a full-length payload means a whole-record overwrite.
    pub payload_offset: u16,
    /// The written bytes.
    pub payload: Bytes,
    /// Epoch the owning transaction committed in.
    pub epoch: Epoch,
    /// The owning transaction.
    pub xct_id: XctId,
}

impl LogRecord {
    /// Creates an overwrite record.
    #[must_use]
    pub fn overwrite(
        storage_id: StorageId,
        offset: ArrayOffset,
        payload_offset: u16,
        payload: Bytes,
        epoch: Epoch,
        xct_id: XctId,
    ) -> Self {
        Self {
            storage_id,
            offset,
            payload_offset,
            payload,
            epoch,
            xct_id,
        }
    }

    /// The ordering key used by reducers and composers.
    #[inline]
    #[must_use]
    pub fn sort_key(&self) -> (ArrayOffset, Epoch, XctId) {
        (self.offset, self.epoch, self.xct_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: ArrayOffset, epoch: u64, ordinal: u32) -> LogRecord {
        LogRecord::overwrite(
            StorageId::new(1),
            offset,
            0,
            Bytes::from_static(b"x"),
            Epoch::new(epoch),
            XctId::new(Epoch::new(epoch), ordinal),
        )
    }

    #[test]
    fn test_sort_key_orders_by_offset_then_epoch_then_xct() {
        let a = record(1, 5, 0);
        let b = record(2, 1, 0);
        let c = record(2, 1, 7);
        let d = record(2, 3, 0);
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
        assert!(c.sort_key() < d.sort_key());
    }
}
