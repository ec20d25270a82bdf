//! Storage metadata records.
//!
//! Snapshot metadata files carry one cloned metadata record per storage,
//! including the storage's new snapshot root. The records are flat so they
//! serialize cleanly into the XML metadata file.

use serde::{Deserialize, Serialize};

use ferrite_common::types::{ArrayOffset, SnapshotPagePointer, StorageId};

/// Kind discriminator of a storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Fixed-size array of fixed-length records.
    Array,
    /// Ordered keyed table.
    OrderedTable,
    /// Hash keyed table.
    HashTable,
}

/// A cloned, serializable description of one storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Storage ID.
    pub id: StorageId,
    /// Storage name.
    pub name: String,
    /// Storage kind.
    pub kind: StorageKind,
    /// Record payload length; zero for tables.
    pub payload_len: u16,
    /// Record count; zero for tables.
    pub array_size: ArrayOffset,
    /// Root page of the storage in the latest snapshot.
    pub root_snapshot_page_id: SnapshotPagePointer,
}

impl StorageMetadata {
    /// Creates metadata for an array storage.
    #[must_use]
    pub fn array(
        id: StorageId,
        name: impl Into<String>,
        payload_len: u16,
        array_size: ArrayOffset,
        root: SnapshotPagePointer,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: StorageKind::Array,
            payload_len,
            array_size,
            root_snapshot_page_id: root,
        }
    }

    /// Creates metadata for a keyed table.
    #[must_use]
    pub fn table(id: StorageId, name: impl Into<String>, ordered: bool) -> Self {
        Self {
            id,
            name: name.into(),
            kind: if ordered {
                StorageKind::OrderedTable
            } else {
                StorageKind::HashTable
            },
            payload_len: 0,
            array_size: 0,
            root_snapshot_page_id: SnapshotPagePointer::NULL,
        }
    }
}
