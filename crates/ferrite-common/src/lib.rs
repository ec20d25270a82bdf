//! # ferrite-common
//!
//! Common types, errors, and configuration for the ferrite engine.
//!
//! This crate provides the foundational types and abstractions used across
//! all ferrite components. It includes:
//!
//! - **Types**: Core identifiers (`StorageId`, `SnapshotId`,
//!   `SnapshotPagePointer`, `XctId`), the engine's logical clock (`Epoch`)
//! - **Errors**: Unified error handling with `FerriteError` and stable
//!   `ErrorCode` identifiers
//! - **Config**: Engine configuration structures
//! - **Constants**: System-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use ferrite_common::types::{Epoch, SnapshotId, StorageId};
//! use ferrite_common::error::FerriteResult;
//!
//! fn example() -> FerriteResult<()> {
//!     let storage = StorageId::new(1);
//!     let snapshot = SnapshotId::new(1);
//!     let epoch = Epoch::new(42);
//!     assert!(storage.is_valid() && snapshot.is_valid() && epoch.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::EngineConfig;
pub use error::{ErrorCode, FerriteError, FerriteResult};
pub use types::{
    ArrayOffset, Epoch, LoggerId, NodeId, PagePoolOffset, SnapshotId, SnapshotPagePointer,
    StorageId, WorkerId, XctId,
};
