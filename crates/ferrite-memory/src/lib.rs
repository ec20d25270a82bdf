//! # ferrite-memory
//!
//! NUMA-aware page memory for the ferrite engine.
//!
//! This crate implements:
//! - Page-aligned memory buffers with NUMA-node preference
//! - The per-node [`PagePool`]: a fixed-capacity pool of uniform pages
//!   served through a lock-protected circular free list
//! - [`PageOffsetChunk`]: the bounded buffer pages are grabbed into and
//!   released from
//!
//! [`PagePool`]: page_pool::PagePool
//! [`PageOffsetChunk`]: chunk::PageOffsetChunk

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aligned;
pub mod chunk;
pub mod numa;
pub mod page_pool;

pub use aligned::AlignedBuffer;
pub use chunk::{PageOffsetChunk, CHUNK_CAPACITY};
pub use page_pool::{PagePool, PagePoolStat};
