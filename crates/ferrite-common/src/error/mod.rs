//! Unified error handling for the ferrite engine.

mod engine;

pub use engine::{ErrorCode, FerriteError, FerriteResult};
