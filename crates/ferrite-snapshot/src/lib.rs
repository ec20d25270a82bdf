//! # ferrite-snapshot
//!
//! The snapshot subsystem of the ferrite engine.
//!
//! A long-running coordinator periodically transforms the durable log
//! tail into an on-disk snapshot image. Each iteration is a map/reduce
//! pass ("log gleaning"):
//!
//! 1. Per-logger [`LogMapper`]s drain their log partition and bucketize
//!    records by destination node
//! 2. Per-node [`LogReducer`]s merge-sort the shipments into per-storage
//!    sorted runs
//! 3. Per-storage [`ArrayComposer`]s stream the merged runs onto the
//!    previous snapshot's pages, appending new pages through a
//!    [`SnapshotWriter`] and emitting a new root pointer
//! 4. The [`SnapshotManager`] writes the metadata file, takes a
//!    savepoint, installs the new root pointers with transaction
//!    execution paused, and drops superseded volatile pages back to their
//!    node's page pool
//!
//! [`LogMapper`]: mapper::LogMapper
//! [`LogReducer`]: reducer::LogReducer
//! [`ArrayComposer`]: composer::ArrayComposer
//! [`SnapshotWriter`]: writer::SnapshotWriter
//! [`SnapshotManager`]: manager::SnapshotManager

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod composer;
pub mod gleaner;
pub mod log_buffer;
pub mod manager;
pub mod mapper;
pub mod metadata;
pub mod reducer;
pub mod savepoint;
pub mod snapshot;
pub mod writer;

pub use composer::ArrayComposer;
pub use manager::SnapshotManager;
pub use metadata::SnapshotMetadata;
pub use savepoint::SavepointManager;
pub use snapshot::Snapshot;
pub use writer::SnapshotWriter;
