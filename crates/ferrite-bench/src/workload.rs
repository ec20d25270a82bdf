//! YCSB domain types: keys, records, and workload mixes.

use bytes::Bytes;

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_storage::TableKind;

/// Fields per record.
pub const FIELDS: usize = 10;

/// Bytes per field.
pub const FIELD_LENGTH: usize = 10;

/// Total record size.
pub const RECORD_SIZE: usize = FIELDS * FIELD_LENGTH;

/// Composite workload key: the owning worker plus a per-worker counter.
///
/// Orders by `(high, low)`, matching the big-endian byte encoding used in
/// the table, so pre-sorted key vectors access records in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YcsbKey {
    /// Owning worker partition.
    pub high: u32,
    /// Index within the worker's key space.
    pub low: u32,
}

impl YcsbKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    /// Encodes the key as 8 big-endian bytes.
    #[must_use]
    pub fn to_bytes(self) -> Bytes {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.high.to_be_bytes());
        bytes[4..].copy_from_slice(&self.low.to_be_bytes());
        Bytes::copy_from_slice(&bytes)
    }
}

/// Fixed-schema workload record: [`FIELDS`] fields of [`FIELD_LENGTH`]
/// bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YcsbRecord {
    data: [u8; RECORD_SIZE],
}

impl YcsbRecord {
    /// Creates a record with every byte set to `fill`.
    #[must_use]
    pub const fn new(fill: u8) -> Self {
        Self {
            data: [fill; RECORD_SIZE],
        }
    }

    /// Returns the whole record as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Returns one field's bytes.
    ///
    /// # Panics
    ///
    /// Panics if `field` is out of range.
    #[must_use]
    pub fn field(&self, field: usize) -> &[u8] {
        assert!(field < FIELDS);
        &self.data[field * FIELD_LENGTH..(field + 1) * FIELD_LENGTH]
    }

    /// Byte offset of one field within the record.
    #[inline]
    #[must_use]
    pub const fn field_offset(field: usize) -> usize {
        field * FIELD_LENGTH
    }
}

/// One YCSB workload mix.
///
/// The percent fields are cumulative thresholds over a uniform draw in
/// `1..=100`: a draw `x` selects insert when `x <= insert_percent`, read
/// when `x <= read_percent`, and so on; read-modify-write takes the
/// remainder up to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YcsbWorkload {
    /// One-letter mix name.
    pub desc: char,
    /// Cumulative insert threshold.
    pub insert_percent: u32,
    /// Cumulative read threshold.
    pub read_percent: u32,
    /// Cumulative update threshold.
    pub update_percent: u32,
    /// Cumulative scan threshold.
    pub scan_percent: u32,
    /// Cumulative read-modify-write threshold; always 100.
    pub rmw_percent: u32,
    /// Operations per transaction.
    pub reps_per_tx: u32,
    /// Additional skewed reads appended to each RMW transaction.
    pub rmw_additional_reads: u32,
    /// Upper bound for scan lengths.
    pub max_scan_length: u32,
}

impl YcsbWorkload {
    /// Workload A: 50% reads, 50% updates.
    pub const A: Self = Self::mix('A', 0, 50, 100, 100);
    /// Workload B: 95% reads, 5% updates.
    pub const B: Self = Self::mix('B', 0, 95, 100, 100);
    /// Workload C: 100% reads.
    pub const C: Self = Self::mix('C', 0, 100, 100, 100);
    /// Workload D: 5% inserts, 95% reads.
    pub const D: Self = Self::mix('D', 5, 100, 100, 100);
    /// Workload E: 5% inserts, 95% scans.
    pub const E: Self = Self::mix('E', 5, 5, 5, 100);
    /// Workload F: 50% reads, 50% read-modify-writes.
    pub const F: Self = Self::mix('F', 0, 50, 50, 50);

    const fn mix(desc: char, insert: u32, read: u32, update: u32, scan: u32) -> Self {
        Self {
            desc,
            insert_percent: insert,
            read_percent: read,
            update_percent: update,
            scan_percent: scan,
            rmw_percent: 100,
            reps_per_tx: 1,
            rmw_additional_reads: 0,
            max_scan_length: 100,
        }
    }

    /// Looks a mix up by its one-letter name.
    #[must_use]
    pub fn by_desc(desc: char) -> Option<Self> {
        match desc.to_ascii_uppercase() {
            'A' => Some(Self::A),
            'B' => Some(Self::B),
            'C' => Some(Self::C),
            'D' => Some(Self::D),
            'E' => Some(Self::E),
            'F' => Some(Self::F),
            _ => None,
        }
    }

    /// True when the mix ever issues scans.
    #[must_use]
    pub const fn has_scans(&self) -> bool {
        self.scan_percent > self.update_percent
    }

    /// Validates the mix against the table it will run on.
    ///
    /// Scanning mixes are rejected on hash tables here, before any worker
    /// starts, rather than erroring at run time.
    pub fn validate(&self, kind: TableKind) -> FerriteResult<()> {
        if self.insert_percent > self.read_percent
            || self.read_percent > self.update_percent
            || self.update_percent > self.scan_percent
            || self.scan_percent > self.rmw_percent
            || self.rmw_percent != 100
        {
            return Err(FerriteError::invalid_config(format!(
                "workload {} has non-monotone thresholds",
                self.desc
            )));
        }
        if self.reps_per_tx == 0 {
            return Err(FerriteError::invalid_config("reps_per_tx must be positive"));
        }
        if self.has_scans() && kind == TableKind::Hash {
            return Err(FerriteError::invalid_config(format!(
                "workload {} scans, which a hash table does not support",
                self.desc
            )));
        }
        Ok(())
    }
}
