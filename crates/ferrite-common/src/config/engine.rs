//! Engine configuration.
//!
//! The configuration is grouped into one section per subsystem, mirroring
//! the modules that consume them. Path patterns may contain the `$NODE$`
//! and `$LOGGER$` placeholders which are substituted per NUMA node and
//! per logger.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::MIN_PAGE_POOL_SIZE_MB;
use crate::error::{FerriteError, FerriteResult};
use crate::types::{LoggerId, NodeId, SnapshotId};

/// Placeholder substituted with the node number in path patterns.
const NODE_PLACEHOLDER: &str = "$NODE$";

/// Placeholder substituted with the logger number in path patterns.
const LOGGER_PLACEHOLDER: &str = "$LOGGER$";

/// Snapshot subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory template for snapshot files; `$NODE$` is substituted per
    /// node. The node-0 folder doubles as the primary folder holding the
    /// snapshot metadata files.
    pub folder_path_pattern: String,

    /// Idle period between automatic snapshots, in milliseconds.
    pub snapshot_interval_milliseconds: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            folder_path_pattern: "data/snapshots/node_$NODE$".to_string(),
            snapshot_interval_milliseconds: 60_000,
        }
    }
}

impl SnapshotConfig {
    /// Returns the snapshot folder for the given node.
    #[must_use]
    pub fn node_folder(&self, node: NodeId) -> PathBuf {
        PathBuf::from(
            self.folder_path_pattern
                .replace(NODE_PLACEHOLDER, &node.as_u16().to_string()),
        )
    }

    /// Returns the primary snapshot folder (node 0), which holds the
    /// metadata files.
    #[must_use]
    pub fn primary_folder(&self) -> PathBuf {
        self.node_folder(NodeId::new(0))
    }

    /// Returns the metadata file path for the given snapshot.
    #[must_use]
    pub fn metadata_file_path(&self, snapshot_id: SnapshotId) -> PathBuf {
        self.primary_folder()
            .join(format!("snapshot_metadata_{}.xml", snapshot_id))
    }

    /// Returns the data file path for the given snapshot and node.
    #[must_use]
    pub fn data_file_path(&self, snapshot_id: SnapshotId, node: NodeId) -> PathBuf {
        self.node_folder(node)
            .join(format!("snapshot_{}_node_{}.data", snapshot_id, node))
    }

    /// Returns the snapshot interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_milliseconds)
    }
}

/// Log subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory template for log partitions; `$NODE$` and `$LOGGER$` are
    /// substituted per node and per logger.
    pub folder_path_pattern: String,

    /// Number of loggers (and therefore snapshot mappers) per node.
    pub loggers_per_node: u16,

    /// Whether to flush the log on graceful shutdown.
    pub flush_at_shutdown: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            folder_path_pattern: "data/log/node_$NODE$/logger_$LOGGER$".to_string(),
            loggers_per_node: 1,
            flush_at_shutdown: true,
        }
    }
}

impl LogConfig {
    /// Returns the log folder for the given node and logger.
    #[must_use]
    pub fn logger_folder(&self, node: NodeId, logger: LoggerId) -> PathBuf {
        PathBuf::from(
            self.folder_path_pattern
                .replace(NODE_PLACEHOLDER, &node.as_u16().to_string())
                .replace(LOGGER_PLACEHOLDER, &logger.as_u16().to_string()),
        )
    }
}

/// Thread layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadConfig {
    /// Number of NUMA groups. Equals the reducer count and the page pool
    /// count.
    pub group_count: u16,

    /// Worker threads per node.
    pub thread_count_per_group: u16,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            group_count: 1,
            thread_count_per_group: 2,
        }
    }
}

impl ThreadConfig {
    /// Total worker threads across all nodes.
    #[must_use]
    pub fn total_workers(&self) -> u32 {
        u32::from(self.group_count) * u32::from(self.thread_count_per_group)
    }
}

/// Memory subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Page pool size per node, in megabytes. Must be at least
    /// [`MIN_PAGE_POOL_SIZE_MB`].
    pub page_pool_size_mb_per_node: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_pool_size_mb_per_node: 32,
        }
    }
}

/// Savepoint subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavepointConfig {
    /// Location of the savepoint file.
    pub savepoint_path: PathBuf,
}

impl Default for SavepointConfig {
    fn default() -> Self {
        Self {
            savepoint_path: PathBuf::from("data/savepoint.xml"),
        }
    }
}

/// Debug logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggingConfig {
    /// Minimum log level (error, warn, info, debug, trace).
    pub log_level: String,

    /// Comma-separated module list for selective verbose logging; empty
    /// means none.
    pub verbose_modules: String,
}

impl Default for DebuggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            verbose_modules: String::new(),
        }
    }
}

/// Complete engine configuration.
///
/// # Example
///
/// ```rust
/// use ferrite_common::config::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_group_count(2)
///     .with_page_pool_size_mb(16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Snapshot subsystem options.
    pub snapshot: SnapshotConfig,
    /// Log subsystem options.
    pub log: LogConfig,
    /// Thread layout options.
    pub thread: ThreadConfig,
    /// Memory subsystem options.
    pub memory: MemoryConfig,
    /// Savepoint options.
    pub savepoint: SavepointConfig,
    /// Debug logging options.
    pub debugging: DebuggingConfig,
}

impl EngineConfig {
    /// Loads a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> FerriteResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FerriteError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to a TOML string.
    pub fn to_toml(&self) -> FerriteResult<String> {
        toml::to_string_pretty(self).map_err(|e| FerriteError::invalid_config(e.to_string()))
    }

    /// Rewrites every path option to live under the given base directory.
    ///
    /// Convenient for tests and benchmarks that sandbox the engine in a
    /// temporary directory.
    #[must_use]
    pub fn with_data_root(mut self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        self.snapshot.folder_path_pattern = base
            .join("snapshots/node_$NODE$")
            .to_string_lossy()
            .into_owned();
        self.log.folder_path_pattern = base
            .join("log/node_$NODE$/logger_$LOGGER$")
            .to_string_lossy()
            .into_owned();
        self.savepoint.savepoint_path = base.join("savepoint.xml");
        self
    }

    /// Sets the number of NUMA groups.
    #[must_use]
    pub fn with_group_count(mut self, count: u16) -> Self {
        self.thread.group_count = count;
        self
    }

    /// Sets the worker threads per node.
    #[must_use]
    pub fn with_threads_per_group(mut self, count: u16) -> Self {
        self.thread.thread_count_per_group = count;
        self
    }

    /// Sets the loggers per node.
    #[must_use]
    pub fn with_loggers_per_node(mut self, count: u16) -> Self {
        self.log.loggers_per_node = count;
        self
    }

    /// Sets the page pool size per node in megabytes.
    #[must_use]
    pub fn with_page_pool_size_mb(mut self, mb: u64) -> Self {
        self.memory.page_pool_size_mb_per_node = mb;
        self
    }

    /// Sets the automatic snapshot interval in milliseconds.
    #[must_use]
    pub fn with_snapshot_interval_ms(mut self, ms: u64) -> Self {
        self.snapshot.snapshot_interval_milliseconds = ms;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FerriteResult<()> {
        if self.memory.page_pool_size_mb_per_node < MIN_PAGE_POOL_SIZE_MB {
            return Err(FerriteError::invalid_config(format!(
                "page_pool_size_mb_per_node must be at least {} MB",
                MIN_PAGE_POOL_SIZE_MB
            )));
        }
        if self.thread.group_count == 0 {
            return Err(FerriteError::invalid_config("group_count must be positive"));
        }
        if self.thread.group_count > 256 {
            return Err(FerriteError::invalid_config(
                "group_count must be at most 256",
            ));
        }
        if self.thread.thread_count_per_group == 0 {
            return Err(FerriteError::invalid_config(
                "thread_count_per_group must be positive",
            ));
        }
        if self.log.loggers_per_node == 0 {
            return Err(FerriteError::invalid_config(
                "loggers_per_node must be positive",
            ));
        }
        if self.snapshot.snapshot_interval_milliseconds == 0 {
            return Err(FerriteError::invalid_config(
                "snapshot_interval_milliseconds must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_group_count(4)
            .with_threads_per_group(8)
            .with_loggers_per_node(2)
            .with_page_pool_size_mb(64);
        assert_eq!(config.thread.group_count, 4);
        assert_eq!(config.thread.total_workers(), 32);
        assert_eq!(config.log.loggers_per_node, 2);
        assert_eq!(config.memory.page_pool_size_mb_per_node, 64);
    }

    #[test]
    fn test_validation_rejects_tiny_pool() {
        let config = EngineConfig::default().with_page_pool_size_mb(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_groups() {
        let config = EngineConfig::default().with_group_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_substitution() {
        let config = SnapshotConfig {
            folder_path_pattern: "/tmp/snap/node_$NODE$".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.node_folder(NodeId::new(3)),
            PathBuf::from("/tmp/snap/node_3")
        );
        assert_eq!(config.primary_folder(), PathBuf::from("/tmp/snap/node_0"));
    }

    #[test]
    fn test_metadata_file_path() {
        let config = SnapshotConfig {
            folder_path_pattern: "/tmp/snap/node_$NODE$".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.metadata_file_path(SnapshotId::new(7)),
            PathBuf::from("/tmp/snap/node_0/snapshot_metadata_7.xml")
        );
    }

    #[test]
    fn test_logger_substitution() {
        let config = LogConfig {
            folder_path_pattern: "/tmp/log/node_$NODE$/logger_$LOGGER$".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.logger_folder(NodeId::new(1), LoggerId::new(2)),
            PathBuf::from("/tmp/log/node_1/logger_2")
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default().with_group_count(2);
        let toml = config.to_toml().unwrap();
        let parsed: EngineConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.thread.group_count, 2);
        assert_eq!(
            parsed.snapshot.folder_path_pattern,
            config.snapshot.folder_path_pattern
        );
    }

    #[test]
    fn test_with_data_root() {
        let config = EngineConfig::default().with_data_root("/scratch/run1");
        assert!(config
            .snapshot
            .folder_path_pattern
            .starts_with("/scratch/run1"));
        assert_eq!(
            config.savepoint.savepoint_path,
            PathBuf::from("/scratch/run1/savepoint.xml")
        );
    }
}
