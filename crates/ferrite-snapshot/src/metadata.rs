//! Snapshot metadata files.
//!
//! Each completed snapshot is described by a single
//! `snapshot_metadata_<id>.xml` file in the primary snapshot folder: the
//! snapshot header plus one cloned metadata record per storage carrying
//! its new root page. The file is written atomically
//! (write-then-fsync-then-fsync-parent); crash recovery therefore never
//! observes installed root pointers without their metadata.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{Epoch, SnapshotId, StorageId};
use ferrite_storage::StorageMetadata;

/// Serialized description of one completed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "snapshot-metadata")]
pub struct SnapshotMetadata {
    /// Snapshot ID.
    pub id: SnapshotId,
    /// Epoch the previous snapshot was valid until.
    pub base_epoch: Epoch,
    /// Last epoch whose logs this snapshot covers.
    pub valid_until_epoch: Epoch,
    /// Largest storage ID at snapshot time.
    pub largest_storage_id: StorageId,
    /// Cloned per-storage metadata with new root pages installed.
    #[serde(rename = "storage", default)]
    pub storages: Vec<StorageMetadata>,
}

impl SnapshotMetadata {
    /// Serializes the metadata to `path` and fsyncs the file and its
    /// parent directory.
    pub fn save_to_file(&self, path: &Path) -> FerriteResult<()> {
        let xml = quick_xml::se::to_string(self)
            .map_err(|e| FerriteError::metadata(e.to_string()))?;
        std::fs::write(path, xml.as_bytes())?;
        File::open(path)?.sync_all()?;
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
        info!(
            path = %path.display(),
            bytes = xml.len(),
            "wrote snapshot metadata file"
        );
        Ok(())
    }

    /// Loads metadata from `path`.
    pub fn load_from_file(path: &Path) -> FerriteResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let metadata: Self = quick_xml::de::from_str(&content)
            .map_err(|e| FerriteError::metadata(e.to_string()))?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::types::{NodeId, SnapshotPagePointer};
    use tempfile::TempDir;

    fn sample() -> SnapshotMetadata {
        SnapshotMetadata {
            id: SnapshotId::new(2),
            base_epoch: Epoch::new(5),
            valid_until_epoch: Epoch::new(9),
            largest_storage_id: StorageId::new(2),
            storages: vec![
                StorageMetadata::array(
                    StorageId::new(1),
                    "accounts",
                    64,
                    1024,
                    SnapshotPagePointer::new(SnapshotId::new(2), NodeId::new(0), 17),
                ),
                StorageMetadata::table(StorageId::new(2), "sessions", true),
            ],
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snapshot_metadata_2.xml");
        let metadata = sample();
        metadata.save_to_file(&path).unwrap();

        let loaded = SnapshotMetadata::load_from_file(&path).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn test_file_is_xml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snapshot_metadata_2.xml");
        sample().save_to_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<snapshot-metadata"));
        assert!(content.contains("<storage>"));
        assert!(content.contains("accounts"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(SnapshotMetadata::load_from_file(&tmp.path().join("nope.xml")).is_err());
    }

    #[test]
    fn test_load_garbage_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.xml");
        std::fs::write(&path, "not xml at all").unwrap();
        assert!(matches!(
            SnapshotMetadata::load_from_file(&path),
            Err(FerriteError::Metadata { .. })
        ));
    }
}
