// Row Truth Storage Abstraction
//
// Defines the durability contract for the authoritative row log.
// Implementations may persist to disk, object storage, databases, etc.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ContentKey, TableId, TableRowChange, Version};
use crate::error::{Error, Result};

/// Storage backend for the row truth log.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered by version within a table
/// - Durable
/// - Insert-if-absent on `(table, version)`
///
/// Implementations MUST NOT:
/// - Reorder changes
/// - Mutate existing changes or payloads
pub trait RowTruthStore: Send + Sync {
    /// Persist one change together with its serialized rows.
    ///
    /// Fails if a change with the same table and version already exists.
    fn insert(&self, change: &TableRowChange, payload: Vec<u8>) -> Result<()>;

    fn get_change(&self, table_id: &TableId, version: Version) -> Result<Option<TableRowChange>>;

    fn get_payload(&self, key: &ContentKey) -> Result<Option<Arc<[u8]>>>;

    /// Every change of `table_id`, in version order.
    fn list_changes(&self, table_id: &TableId) -> Result<Vec<TableRowChange>>;

    fn latest_version(&self, table_id: &TableId) -> Result<Option<Version>>;

    /// Remove every change of every table.
    fn truncate(&self) -> Result<()>;
}

type TableLog = BTreeMap<Version, (TableRowChange, Arc<[u8]>)>;

#[derive(Debug, Default)]
pub struct InMemoryRowTruthStore {
    tables: RwLock<HashMap<TableId, Arc<RwLock<TableLog>>>>,
}

impl InMemoryRowTruthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table_id: &TableId) -> Option<Arc<RwLock<TableLog>>> {
        self.tables.read().get(table_id).cloned()
    }
}

impl RowTruthStore for InMemoryRowTruthStore {
    fn insert(&self, change: &TableRowChange, payload: Vec<u8>) -> Result<()> {
        let table = match self.table(&change.table_id) {
            Some(table) => table,
            None => self
                .tables
                .write()
                .entry(change.table_id.clone())
                .or_default()
                .clone(),
        };
        let mut log = table.write();
        if log.contains_key(&change.version) {
            return Err(Error::Datastore(format!(
                "change {} already exists",
                change.content_key
            )));
        }
        log.insert(change.version, (change.clone(), Arc::from(payload)));
        Ok(())
    }

    fn get_change(&self, table_id: &TableId, version: Version) -> Result<Option<TableRowChange>> {
        Ok(self
            .table(table_id)
            .and_then(|t| t.read().get(&version).map(|(change, _)| change.clone())))
    }

    fn get_payload(&self, key: &ContentKey) -> Result<Option<Arc<[u8]>>> {
        Ok(self
            .table(&key.table_id)
            .and_then(|t| t.read().get(&key.version).map(|(_, payload)| payload.clone())))
    }

    fn list_changes(&self, table_id: &TableId) -> Result<Vec<TableRowChange>> {
        Ok(self
            .table(table_id)
            .map(|t| t.read().values().map(|(change, _)| change.clone()).collect())
            .unwrap_or_default())
    }

    fn latest_version(&self, table_id: &TableId) -> Result<Option<Version>> {
        Ok(self
            .table(table_id)
            .and_then(|t| t.read().keys().next_back().copied()))
    }

    fn truncate(&self) -> Result<()> {
        self.tables.write().clear();
        Ok(())
    }
}
