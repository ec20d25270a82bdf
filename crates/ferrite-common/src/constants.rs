//! System-wide constants for the ferrite engine.
//!
//! This module defines constants used across the engine. Values that a
//! deployment may want to tune live in [`crate::config`] instead; the
//! constants here are design parameters baked into on-disk and in-memory
//! layouts.

// =============================================================================
// Page and Memory Constants
// =============================================================================

/// Size of every page in the engine, in bytes (4 KiB).
///
/// All page pools, snapshot files, and page-typed views assume this size.
/// It matches the OS page size so pool memory can be bound to NUMA nodes
/// at page granularity.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Minimum page pool size per NUMA node, in megabytes.
///
/// Below this the pool cannot even hold its own free ring plus a useful
/// number of pages.
pub const MIN_PAGE_POOL_SIZE_MB: u64 = 2;

// =============================================================================
// Snapshot Daemon Constants
// =============================================================================

/// How long the snapshot daemons sleep between wake-up checks, in
/// milliseconds.
///
/// Bounded so that stop requests are noticed promptly even when no
/// condition signal arrives.
pub const SNAPSHOT_POLL_INTERVAL_MS: u64 = 100;

/// Upper bound on the wait for in-flight transactions to drain before
/// snapshot pointers are installed, in milliseconds.
///
/// The pause gate tracks the in-flight count and the wait normally ends
/// as soon as it reaches zero; this bound only applies when a straggler
/// transaction holds the count up.
pub const XCT_DRAIN_TIMEOUT_MS: u64 = 100;

// =============================================================================
// Client Constants
// =============================================================================

/// Per-worker ceiling on unexpected transaction aborts.
///
/// A worker that accumulates more unexpected aborts than this surfaces the
/// last error as fatal instead of retrying.
pub const MAX_UNEXPECTED_ABORTS: u64 = 1000;
