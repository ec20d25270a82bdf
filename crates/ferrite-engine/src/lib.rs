//! # ferrite-engine
//!
//! The ownership root of the ferrite storage core.
//!
//! An [`Engine`] owns every manager and wires them together in dependency
//! order: page pools, the log manager, the transaction manager, the
//! storage manager (installed as the transaction manager's write
//! applier), the savepoint manager, and finally the snapshot manager
//! whose daemons it starts. Teardown runs in reverse and verifies that
//! every page found its way back to its pool.
//!
//! [`Engine`]: engine::Engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;

pub use engine::Engine;
