//! Core type definitions for the ferrite engine.

mod epoch;
mod ids;

pub use epoch::Epoch;
pub use ids::{
    ArrayOffset, LoggerId, NodeId, PagePoolOffset, SnapshotId, SnapshotPagePointer, StorageId,
    WorkerId, XctId,
};
