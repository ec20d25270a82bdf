//! # ferrite-bench
//!
//! YCSB-style transactional workloads for the ferrite engine.
//!
//! This crate implements:
//! - The YCSB domain types: composite keys, fixed-schema records, and
//!   the standard workload mixes
//! - A Zipfian generator for skewed key selection
//! - [`YcsbClient`]: the abort/retry transaction driver with
//!   deterministic replay and classified abort handling
//! - The `ycsb` driver binary and a criterion benchmark for the snapshot
//!   composer path
//!
//! [`YcsbClient`]: client::YcsbClient

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod workload;
pub mod zipfian;

pub use client::{ClientOptions, ClientOutputs, YcsbClient};
pub use workload::{YcsbKey, YcsbRecord, YcsbWorkload, FIELDS, FIELD_LENGTH, RECORD_SIZE};
pub use zipfian::ZipfianRandom;
