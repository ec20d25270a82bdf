//! Keyed record tables.
//!
//! The transactional workloads run against a [`UserTable`]: a keyed table
//! of variable-length records. Operations take the calling transaction
//! and register every access in its sets; writes are buffered as intents
//! and applied by the storage manager when the transaction commits.
//!
//! The table kind tags the access contract: range scans are only offered
//! by ordered tables, and workloads that scan are rejected against hash
//! tables when they are validated, before any worker starts.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use ferrite_common::error::{FerriteError, FerriteResult};
use ferrite_common::types::StorageId;
use ferrite_xct::{WriteIntent, Xct};

/// Access contract of a [`UserTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Keys are ordered; range scans are supported.
    Ordered,
    /// Keys are hashed; point operations only.
    Hash,
}

/// A keyed table of records.
pub struct UserTable {
    id: StorageId,
    name: String,
    kind: TableKind,
    data: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl UserTable {
    /// Creates an empty table.
    #[must_use]
    pub fn create(id: StorageId, name: impl Into<String>, kind: TableKind) -> Self {
        let name = name.into();
        info!(storage = %id, name = %name, ?kind, "created user table");
        Self {
            id,
            name,
            kind,
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the storage ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> StorageId {
        self.id
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true when the table holds no committed records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Reads a whole record, or one slice of it.
    ///
    /// `part` selects `(byte_offset, length)` within the record for
    /// single-field reads.
    pub fn get_record(
        &self,
        xct: &mut Xct,
        key: &Bytes,
        part: Option<(usize, usize)>,
    ) -> FerriteResult<Bytes> {
        xct.add_read_access(self.id, key.clone())?;
        let data = self.data.read();
        let record = data.get(key).ok_or(FerriteError::StrKeyNotFound)?;
        match part {
            None => Ok(record.clone()),
            Some((offset, len)) => {
                if offset + len > record.len() {
                    return Err(FerriteError::internal(format!(
                        "field read [{}, {}) beyond record length {}",
                        offset,
                        offset + len,
                        record.len()
                    )));
                }
                Ok(record.slice(offset..offset + len))
            }
        }
    }

    /// Buffers an insert of a new record.
    ///
    /// Fails immediately when the key is already committed; the commit
    /// protocol checks again at apply time, so a race with a concurrent
    /// inserter still surfaces as [`FerriteError::StrKeyAlreadyExists`].
    pub fn insert_record(&self, xct: &mut Xct, key: Bytes, value: Bytes) -> FerriteResult<()> {
        xct.add_read_access(self.id, key.clone())?;
        if self.data.read().contains_key(&key) {
            return Err(FerriteError::StrKeyAlreadyExists);
        }
        xct.add_write_intent(WriteIntent::TablePut {
            storage_id: self.id,
            key,
            value,
            value_offset: 0,
            insert: true,
        })
    }

    /// Buffers an overwrite of (part of) an existing record.
    pub fn overwrite_record(
        &self,
        xct: &mut Xct,
        key: Bytes,
        value: Bytes,
        value_offset: u16,
    ) -> FerriteResult<()> {
        xct.add_read_access(self.id, key.clone())?;
        if !self.data.read().contains_key(&key) {
            return Err(FerriteError::StrKeyNotFound);
        }
        xct.add_write_intent(WriteIntent::TablePut {
            storage_id: self.id,
            key,
            value,
            value_offset,
            insert: false,
        })
    }

    /// Reads up to `count` records starting at `start_key`, inclusive.
    ///
    /// Only ordered tables support scans; workload validation rejects
    /// scanning workloads on hash tables before execution, so reaching
    /// this on a hash table is a caller bug.
    pub fn scan(
        &self,
        xct: &mut Xct,
        start_key: &Bytes,
        count: usize,
    ) -> FerriteResult<Vec<(Bytes, Bytes)>> {
        if self.kind != TableKind::Ordered {
            return Err(FerriteError::user_defined(
                "scan is not supported on a hash table",
            ));
        }
        let data = self.data.read();
        let mut results = Vec::new();
        for (key, value) in data.range(start_key.clone()..) {
            if results.len() >= count {
                break;
            }
            xct.add_read_access(self.id, key.clone())?;
            results.push((key.clone(), value.clone()));
        }
        Ok(results)
    }

    /// Checks whether a put would apply cleanly, without mutating.
    ///
    /// Run under the commit lock right before [`apply_put`], this is what
    /// turns a racing insert into a clean conflict abort instead of a
    /// half-applied write set.
    ///
    /// [`apply_put`]: UserTable::apply_put
    pub fn check_put(&self, key: &Bytes, insert: bool) -> FerriteResult<()> {
        let exists = self.data.read().contains_key(key);
        if insert && exists {
            return Err(FerriteError::StrKeyAlreadyExists);
        }
        if !insert && !exists {
            return Err(FerriteError::StrKeyNotFound);
        }
        Ok(())
    }

    /// Applies a committed put.
    pub fn apply_put(
        &self,
        key: &Bytes,
        value: &Bytes,
        value_offset: u16,
        insert: bool,
    ) -> FerriteResult<()> {
        let mut data = self.data.write();
        if insert {
            if data.contains_key(key) {
                return Err(FerriteError::StrKeyAlreadyExists);
            }
            data.insert(key.clone(), value.clone());
            return Ok(());
        }

        let record = data.get_mut(key).ok_or(FerriteError::StrKeyNotFound)?;
        let offset = value_offset as usize;
        if offset + value.len() > record.len() {
            return Err(FerriteError::internal(format!(
                "overwrite [{}, {}) beyond record length {}",
                offset,
                offset + value.len(),
                record.len()
            )));
        }
        let mut bytes = record.to_vec();
        bytes[offset..offset + value.len()].copy_from_slice(value);
        *record = Bytes::from(bytes);
        Ok(())
    }
}

impl std::fmt::Debug for UserTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_common::types::WorkerId;
    use ferrite_common::EngineConfig;
    use ferrite_log::LogManager;
    use ferrite_xct::{IsolationLevel, XctConfig, XctManager};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_xct_manager() -> (Arc<XctManager>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default().with_data_root(tmp.path());
        let log = Arc::new(LogManager::new(&config).unwrap());
        (Arc::new(XctManager::new(log, 1, XctConfig::default())), tmp)
    }

    fn begin(manager: &XctManager) -> Xct {
        manager
            .begin_xct(WorkerId::new(0), IsolationLevel::Serializable)
            .unwrap()
    }

    #[test]
    fn test_insert_then_get() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Ordered);

        let mut xct = begin(&manager);
        table
            .insert_record(&mut xct, Bytes::from_static(b"k1"), Bytes::from_static(b"hello"))
            .unwrap();
        // Intent is buffered, not yet visible.
        assert!(table.is_empty());
        assert_eq!(xct.write_set().len(), 1);

        table
            .apply_put(
                &Bytes::from_static(b"k1"),
                &Bytes::from_static(b"hello"),
                0,
                true,
            )
            .unwrap();
        manager.abort_xct(&mut xct).unwrap();

        let mut xct = begin(&manager);
        let record = table
            .get_record(&mut xct, &Bytes::from_static(b"k1"), None)
            .unwrap();
        assert_eq!(record, Bytes::from_static(b"hello"));
        manager.abort_xct(&mut xct).unwrap();
    }

    #[test]
    fn test_insert_conflict() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Ordered);
        table
            .apply_put(&Bytes::from_static(b"k"), &Bytes::from_static(b"v"), 0, true)
            .unwrap();

        let mut xct = begin(&manager);
        let err = table
            .insert_record(&mut xct, Bytes::from_static(b"k"), Bytes::from_static(b"w"))
            .unwrap_err();
        assert!(err.is_key_already_exists());
        manager.abort_xct(&mut xct).unwrap();

        // The apply-time check catches races too.
        assert!(table
            .apply_put(&Bytes::from_static(b"k"), &Bytes::from_static(b"w"), 0, true)
            .unwrap_err()
            .is_key_already_exists());
    }

    #[test]
    fn test_field_read_and_overwrite() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Ordered);
        table
            .apply_put(
                &Bytes::from_static(b"k"),
                &Bytes::from_static(b"aaaabbbbcccc"),
                0,
                true,
            )
            .unwrap();

        let mut xct = begin(&manager);
        let field = table
            .get_record(&mut xct, &Bytes::from_static(b"k"), Some((4, 4)))
            .unwrap();
        assert_eq!(field, Bytes::from_static(b"bbbb"));

        table
            .overwrite_record(&mut xct, Bytes::from_static(b"k"), Bytes::from_static(b"XXXX"), 4)
            .unwrap();
        manager.abort_xct(&mut xct).unwrap();

        // Apply the field overwrite directly.
        table
            .apply_put(&Bytes::from_static(b"k"), &Bytes::from_static(b"XXXX"), 4, false)
            .unwrap();
        let mut xct = begin(&manager);
        let record = table
            .get_record(&mut xct, &Bytes::from_static(b"k"), None)
            .unwrap();
        assert_eq!(record, Bytes::from_static(b"aaaaXXXXcccc"));
        manager.abort_xct(&mut xct).unwrap();
    }

    #[test]
    fn test_missing_key() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Ordered);
        let mut xct = begin(&manager);
        assert!(matches!(
            table.get_record(&mut xct, &Bytes::from_static(b"nope"), None),
            Err(FerriteError::StrKeyNotFound)
        ));
        assert!(matches!(
            table.overwrite_record(
                &mut xct,
                Bytes::from_static(b"nope"),
                Bytes::from_static(b"v"),
                0
            ),
            Err(FerriteError::StrKeyNotFound)
        ));
        manager.abort_xct(&mut xct).unwrap();
    }

    #[test]
    fn test_scan_ordered() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Ordered);
        for key in [b"a", b"b", b"c", b"d"] {
            table
                .apply_put(&Bytes::copy_from_slice(key), &Bytes::from_static(b"v"), 0, true)
                .unwrap();
        }

        let mut xct = begin(&manager);
        let results = table.scan(&mut xct, &Bytes::from_static(b"b"), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Bytes::from_static(b"b"));
        assert_eq!(results[1].0, Bytes::from_static(b"c"));
        assert_eq!(xct.read_set().len(), 2);
        manager.abort_xct(&mut xct).unwrap();
    }

    #[test]
    fn test_scan_on_hash_table_fails() {
        let (manager, _tmp) = test_xct_manager();
        let table = UserTable::create(StorageId::new(1), "t", TableKind::Hash);
        let mut xct = begin(&manager);
        assert!(table.scan(&mut xct, &Bytes::from_static(b"a"), 1).is_err());
        manager.abort_xct(&mut xct).unwrap();
    }
}
