//! # ferrite-xct
//!
//! Transaction management for the ferrite engine.
//!
//! This crate implements:
//! - [`Xct`]: the per-attempt transaction owning bounded read, write,
//!   pointer, and page-version sets
//! - [`XctManager`]: begin/precommit/abort, the pause gate used while
//!   snapshot pointers are installed, and per-worker running flags
//! - [`WriteApplier`]: the seam through which committed write intents are
//!   applied to storages
//!
//! [`Xct`]: xct::Xct
//! [`XctManager`]: manager::XctManager
//! [`WriteApplier`]: manager::WriteApplier

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod xct;

pub use manager::{WriteApplier, XctManager};
pub use xct::{IsolationLevel, Xct, XctConfig, XctState, WriteIntent};
