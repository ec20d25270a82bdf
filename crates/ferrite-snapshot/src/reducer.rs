//! The per-node log reducer.
//!
//! Mappers ship bucketized log records into the owning node's
//! [`ReducerInbox`] through shared memory; the node's [`LogReducer`]
//! merge-sorts all shipments into one sorted run per storage. Each
//! shipment is sorted individually and the sorted shipments are k-way
//! merged, so the cost stays `O(n log n)` even when many mappers feed one
//! reducer.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use ferrite_common::types::{NodeId, StorageId};
use ferrite_log::LogRecord;

use crate::log_buffer::{merge_runs, SortedRun};

/// A batch of log records for one storage, shipped mapper to reducer.
#[derive(Debug)]
pub struct Shipment {
    /// Storage the records belong to.
    pub storage_id: StorageId,
    /// The records, in arrival order.
    pub records: Vec<LogRecord>,
}

/// The reducer-side mailbox mappers ship into.
#[derive(Debug, Default)]
pub struct ReducerInbox {
    shipments: Mutex<Vec<Shipment>>,
}

impl ReducerInbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers one shipment.
    pub fn ship(&self, shipment: Shipment) {
        self.shipments.lock().push(shipment);
    }

    /// Takes every delivered shipment.
    #[must_use]
    pub fn take_all(&self) -> Vec<Shipment> {
        std::mem::take(&mut *self.shipments.lock())
    }

    /// Discards any leftover shipments.
    pub fn clear(&self) {
        self.shipments.lock().clear();
    }

    /// Number of undelivered shipments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shipments.lock().len()
    }

    /// Returns true when no shipments are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shipments.lock().is_empty()
    }
}

/// The per-node reducer.
pub struct LogReducer {
    node: NodeId,
}

impl LogReducer {
    /// Creates the reducer for `node`.
    #[must_use]
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }

    /// Returns the node this reducer serves.
    #[inline]
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Consumes the inbox and produces one sorted run per storage.
    #[must_use]
    pub fn reduce(&self, inbox: &ReducerInbox) -> Vec<SortedRun> {
        let shipments = inbox.take_all();
        let mut per_storage: HashMap<StorageId, Vec<Shipment>> = HashMap::new();
        for shipment in shipments {
            per_storage
                .entry(shipment.storage_id)
                .or_default()
                .push(shipment);
        }

        let mut output = Vec::with_capacity(per_storage.len());
        for (storage_id, shipments) in per_storage {
            let total: usize = shipments.iter().map(|s| s.records.len()).sum();
            let sorted: Vec<SortedRun> = shipments
                .into_iter()
                .map(|s| SortedRun::new(storage_id, s.records))
                .collect();
            let merged: Vec<LogRecord> = merge_runs(&sorted).cloned().collect();
            debug_assert_eq!(merged.len(), total);
            debug!(
                node = %self.node,
                storage = %storage_id,
                records = total,
                "reduced shipments into a sorted run"
            );
            output.push(SortedRun::from_sorted(storage_id, merged));
        }
        output
    }
}

impl std::fmt::Debug for LogReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReducer").field("node", &self.node).finish()
    }
}
