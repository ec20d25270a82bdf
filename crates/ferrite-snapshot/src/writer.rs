//! The per-node snapshot writer.
//!
//! A [`SnapshotWriter`] owns one append-only data file per `(snapshot,
//! node)` and assigns monotonically increasing page offsets within it.
//! Pages are buffered and written out in batches; there are no
//! random-access writes during composition.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use ferrite_common::config::EngineConfig;
use ferrite_common::constants::PAGE_SIZE;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{NodeId, SnapshotId, SnapshotPagePointer};
use ferrite_storage::page::PageHeader;

/// Pages buffered before a write syscall.
const WRITE_BATCH_PAGES: usize = 64;

/// Append-only writer for one snapshot data file.
pub struct SnapshotWriter {
    snapshot_id: SnapshotId,
    node: NodeId,
    path: PathBuf,
    file: Option<File>,
    /// Page batch buffer.
    buffer: Vec<u8>,
    /// Next in-file page offset to assign. Offset 0 holds the null page.
    next_offset: u64,
    pages_written: u64,
}

impl SnapshotWriter {
    /// Creates a writer for the given snapshot and node. Call [`open`]
    /// before appending.
    ///
    /// [`open`]: SnapshotWriter::open
    #[must_use]
    pub fn new(config: &Arc<EngineConfig>, snapshot_id: SnapshotId, node: NodeId) -> Self {
        Self {
            snapshot_id,
            node,
            path: config.snapshot.data_file_path(snapshot_id, node),
            file: None,
            buffer: Vec::with_capacity(WRITE_BATCH_PAGES * PAGE_SIZE),
            next_offset: 0,
            pages_written: 0,
        }
    }

    /// Creates the data file (and its folder) and reserves the null page
    /// at offset 0.
    pub fn open(&mut self) -> FerriteResult<()> {
        if self.file.is_some() {
            return Err(FerriteError::internal("snapshot writer already open"));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FerriteError::FsMkdirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = File::create(&self.path)?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        info!(path = %self.path.display(), "opened snapshot data file");
        self.file = Some(file);
        self.next_offset = 1;
        Ok(())
    }

    /// Returns the snapshot this writer belongs to.
    #[inline]
    #[must_use]
    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    /// Returns the node this writer belongs to.
    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Pages appended so far (excluding the null page).
    #[inline]
    #[must_use]
    pub fn pages_written(&self) -> u64 {
        self.pages_written
    }

    /// Appends one page and returns its durable pointer.
    ///
    /// Stamps the page's own pointer into its header and finalizes the
    /// checksum before buffering, so every page on disk is
    /// self-describing.
    ///
    /// # Panics
    ///
    /// Panics if `page` is not exactly one page.
    pub fn append_page(&mut self, page: &mut [u8]) -> FerriteResult<SnapshotPagePointer> {
        assert_eq!(page.len(), PAGE_SIZE, "page buffer must be one page");
        if self.file.is_none() {
            return Err(FerriteError::internal("snapshot writer is not open"));
        }

        let pointer = SnapshotPagePointer::new(self.snapshot_id, self.node, self.next_offset);
        let mut header = PageHeader::new(page);
        header.set_page_id(pointer);
        header.finalize();

        self.buffer.extend_from_slice(page);
        if self.buffer.len() >= WRITE_BATCH_PAGES * PAGE_SIZE {
            self.flush_buffer()?;
        }
        self.next_offset += 1;
        self.pages_written += 1;
        Ok(pointer)
    }

    /// Flushes buffered pages and fsyncs the file.
    pub fn close(&mut self) -> FerriteResult<()> {
        self.flush_buffer()?;
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        file.sync_all()?;
        debug!(
            path = %self.path.display(),
            pages = self.pages_written,
            "closed snapshot data file"
        );
        Ok(())
    }

    fn flush_buffer(&mut self) -> FerriteResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FerriteError::internal("snapshot writer is not open"))?;
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("snapshot_id", &self.snapshot_id)
            .field("node", &self.node)
            .field("next_offset", &self.next_offset)
            .field("pages_written", &self.pages_written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::types::StorageId;
    use ferrite_storage::fileset::SnapshotFileSet;
    use ferrite_storage::page::{LeafBuilder, LeafView};
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Arc<EngineConfig> {
        Arc::new(EngineConfig::default().with_data_root(tmp.path()))
    }

    #[test]
    fn test_append_assigns_monotonic_pointers() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let mut writer = SnapshotWriter::new(&config, SnapshotId::new(1), NodeId::new(0));
        writer.open().unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        let _ = LeafBuilder::init(&mut page, StorageId::new(1), 0, 1, 64);
        let a = writer.append_page(&mut page).unwrap();
        let b = writer.append_page(&mut page).unwrap();
        assert_eq!(a.offset(), 1);
        assert_eq!(b.offset(), 2);
        assert_eq!(a.snapshot_id(), SnapshotId::new(1));
        writer.close().unwrap();

        let len = std::fs::metadata(config.snapshot.data_file_path(SnapshotId::new(1), NodeId::new(0)))
            .unwrap()
            .len();
        assert_eq!(len, 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_written_pages_read_back_validated() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let mut writer = SnapshotWriter::new(&config, SnapshotId::new(1), NodeId::new(0));
        writer.open().unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        let mut builder = LeafBuilder::init(&mut page, StorageId::new(7), 0, 2, 8);
        builder.write_record(0, 0, b"aaaaaaaa");
        builder.write_record(1, 0, b"bbbbbbbb");
        let pointer = writer.append_page(&mut page).unwrap();
        writer.close().unwrap();

        let fileset = SnapshotFileSet::new(Arc::clone(&config));
        let mut buf = vec![0u8; PAGE_SIZE];
        fileset.read_page(pointer, &mut buf).unwrap();
        let leaf = LeafView::new(&buf, 8).unwrap();
        assert_eq!(leaf.record(0), b"aaaaaaaa");
        assert_eq!(leaf.record(1), b"bbbbbbbb");
    }

    #[test]
    fn test_append_without_open_fails() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let mut writer = SnapshotWriter::new(&config, SnapshotId::new(1), NodeId::new(0));
        let mut page = vec![0u8; PAGE_SIZE];
        assert!(writer.append_page(&mut page).is_err());
    }

    #[test]
    fn test_large_batch_flushes() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let mut writer = SnapshotWriter::new(&config, SnapshotId::new(2), NodeId::new(0));
        writer.open().unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        let _ = LeafBuilder::init(&mut page, StorageId::new(1), 0, 1, 64);
        for _ in 0..(WRITE_BATCH_PAGES * 2 + 3) {
            writer.append_page(&mut page).unwrap();
        }
        assert_eq!(writer.pages_written(), (WRITE_BATCH_PAGES * 2 + 3) as u64);
        writer.close().unwrap();

        let len = std::fs::metadata(config.snapshot.data_file_path(SnapshotId::new(2), NodeId::new(0)))
            .unwrap()
            .len();
        assert_eq!(len, (WRITE_BATCH_PAGES * 2 + 4) as u64 * PAGE_SIZE as u64);
    }
}
