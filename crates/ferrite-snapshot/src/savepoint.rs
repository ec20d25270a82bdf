//! The savepoint manager.
//!
//! `savepoint.xml` records which snapshot has durably "happened". The
//! snapshot manager reads it at startup to resume from the latest
//! snapshot and updates it after every completed iteration, strictly
//! after the metadata file is on disk and strictly before pointers are
//! installed.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use ferrite_common::config::EngineConfig;
use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::{Epoch, SnapshotId};

/// The durable savepoint record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "savepoint")]
pub struct Savepoint {
    /// ID of the latest completed snapshot; null when none.
    pub latest_snapshot_id: SnapshotId,
    /// Epoch the latest snapshot is valid until; invalid when none.
    pub latest_snapshot_epoch: Epoch,
}

/// Owner of the savepoint file.
pub struct SavepointManager {
    path: PathBuf,
    state: Mutex<Savepoint>,
}

impl SavepointManager {
    /// Opens (or initializes) the savepoint at the configured path.
    pub fn new(config: &Arc<EngineConfig>) -> FerriteResult<Self> {
        let path = config.savepoint.savepoint_path.clone();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FerriteError::FsMkdirFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let savepoint: Savepoint = quick_xml::de::from_str(&content)
                .map_err(|e| FerriteError::metadata(e.to_string()))?;
            info!(
                path = %path.display(),
                snapshot = %savepoint.latest_snapshot_id,
                epoch = %savepoint.latest_snapshot_epoch,
                "loaded savepoint"
            );
            savepoint
        } else {
            Savepoint::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the latest completed snapshot's ID.
    #[must_use]
    pub fn latest_snapshot_id(&self) -> SnapshotId {
        self.state.lock().latest_snapshot_id
    }

    /// Returns the latest completed snapshot's epoch.
    #[must_use]
    pub fn latest_snapshot_epoch(&self) -> Epoch {
        self.state.lock().latest_snapshot_epoch
    }

    /// Records that the given snapshot has happened and persists the
    /// savepoint file (write, fsync, fsync parent).
    pub fn take_savepoint_after_snapshot(
        &self,
        snapshot_id: SnapshotId,
        epoch: Epoch,
    ) -> FerriteResult<()> {
        let savepoint = Savepoint {
            latest_snapshot_id: snapshot_id,
            latest_snapshot_epoch: epoch,
        };
        let xml = quick_xml::se::to_string(&savepoint)
            .map_err(|e| FerriteError::metadata(e.to_string()))?;
        std::fs::write(&self.path, xml.as_bytes())?;
        File::open(&self.path)?.sync_all()?;
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        *self.state.lock() = savepoint;
        info!(
            snapshot = %snapshot_id,
            epoch = %epoch,
            "took savepoint after snapshot"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SavepointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SavepointManager")
            .field("path", &self.path)
            .field("latest_snapshot_id", &state.latest_snapshot_id)
            .field("latest_snapshot_epoch", &state.latest_snapshot_epoch)
            .finish()
    }
}
