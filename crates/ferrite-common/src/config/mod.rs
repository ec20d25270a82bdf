//! Engine configuration structures.

mod engine;

pub use engine::{
    DebuggingConfig, EngineConfig, LogConfig, MemoryConfig, SavepointConfig, SnapshotConfig,
    ThreadConfig,
};
