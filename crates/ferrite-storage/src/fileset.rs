//! Cached read handles over snapshot data files.
//!
//! Snapshot readers (the array read path and the composer, which reads
//! previous-snapshot pages) go through a [`SnapshotFileSet`] so each
//! `(snapshot, node)` data file is opened once and reused.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use ferrite_common::config::EngineConfig;
use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{NodeId, SnapshotId, SnapshotPagePointer};

/// A set of open snapshot data files, keyed by `(snapshot, node)`.
pub struct SnapshotFileSet {
    config: Arc<EngineConfig>,
    handles: Mutex<HashMap<(SnapshotId, NodeId), Arc<Mutex<File>>>>,
}

impl SnapshotFileSet {
    /// Creates an empty file set.
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the page behind `pointer` into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly one page.
    pub fn read_page(&self, pointer: SnapshotPagePointer, buf: &mut [u8]) -> FerriteResult<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be one page");
        if pointer.is_null() {
            return Err(FerriteError::internal("read through a null snapshot pointer"));
        }

        let file = self.handle(pointer.snapshot_id(), pointer.node())?;
        let mut guard = file.lock();
        guard.seek(SeekFrom::Start(pointer.offset() * PAGE_SIZE as u64))?;
        guard.read_exact(buf)?;
        Ok(())
    }

    /// Closes every cached handle.
    pub fn close_all(&self) {
        let mut handles = self.handles.lock();
        debug!(count = handles.len(), "closing snapshot file set");
        handles.clear();
    }

    fn handle(
        &self,
        snapshot_id: SnapshotId,
        node: NodeId,
    ) -> FerriteResult<Arc<Mutex<File>>> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(&(snapshot_id, node)) {
            return Ok(Arc::clone(handle));
        }
        let path = self.config.snapshot.data_file_path(snapshot_id, node);
        debug!(path = %path.display(), "opening snapshot data file");
        let file = File::open(&path)?;
        let handle = Arc::new(Mutex::new(file));
        handles.insert((snapshot_id, node), Arc::clone(&handle));
        Ok(handle)
    }
}

impl std::fmt::Debug for SnapshotFileSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFileSet")
            .field("open_handles", &self.handles.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn config_under(tmp: &TempDir) -> Arc<EngineConfig> {
        Arc::new(EngineConfig::default().with_data_root(tmp.path()))
    }

    #[test]
    fn test_read_page_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let config = config_under(&tmp);
        let snapshot_id = SnapshotId::new(1);
        let node = NodeId::new(0);

        // Lay out a two-page file by hand: a null page then a payload page.
        let path = config.snapshot.data_file_path(snapshot_id, node);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0u8; PAGE_SIZE]).unwrap();
        file.write_all(&vec![0xCDu8; PAGE_SIZE]).unwrap();
        file.sync_all().unwrap();

        let fileset = SnapshotFileSet::new(config);
        let pointer = SnapshotPagePointer::new(snapshot_id, node, 1);
        let mut buf = vec![0u8; PAGE_SIZE];
        fileset.read_page(pointer, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0xCD));
    }

    #[test]
    fn test_null_pointer_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let fileset = SnapshotFileSet::new(config_under(&tmp));
        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(fileset
            .read_page(SnapshotPagePointer::NULL, &mut buf)
            .is_err());
    }

    #[test]
    fn test_missing_file_surfaces_io_error() {
        let tmp = TempDir::new().unwrap();
        let fileset = SnapshotFileSet::new(config_under(&tmp));
        let pointer = SnapshotPagePointer::new(SnapshotId::new(9), NodeId::new(0), 1);
        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            fileset.read_page(pointer, &mut buf),
            Err(FerriteError::Io { .. })
        ));
    }
}
