//! The snapshot descriptor.

use std::fmt;

use ferrite_common::types::{Epoch, SnapshotId, StorageId};

/// One immutable on-disk snapshot.
///
/// Covers exactly the logs with `epoch <= valid_until_epoch`; the previous
/// snapshot covered everything up to `base_epoch`. Never mutated once the
/// iteration that produced it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Snapshot ID, monotone starting at 1.
    pub id: SnapshotId,
    /// Epoch the previous snapshot was valid until; invalid for the first
    /// snapshot.
    pub base_epoch: Epoch,
    /// Last epoch whose logs this snapshot covers.
    pub valid_until_epoch: Epoch,
    /// Largest storage ID that existed when the snapshot was taken.
    pub max_storage_id: StorageId,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot-{} [{}, {}]",
            self.id, self.base_epoch, self.valid_until_epoch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let snapshot = Snapshot {
            id: SnapshotId::new(3),
            base_epoch: Epoch::new(10),
            valid_until_epoch: Epoch::new(20),
            max_storage_id: StorageId::new(2),
        };
        assert_eq!(snapshot.to_string(), "snapshot-3 [10, 20]");
    }
}
