// Column Definition Storage
//
// Durability contract for content-addressed column definitions.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{ColumnDefinition, ColumnId};
use crate::error::Result;

/// Storage backend for column definitions.
///
/// Properties required from implementations:
/// - Insert-if-absent keyed by the content id
/// - Stored definitions are never mutated
pub trait ColumnStore: Send + Sync {
    /// Store `definition` unless its id is already present.
    ///
    /// Returns `true` when a new definition was written.
    fn insert_if_absent(&self, definition: &ColumnDefinition) -> Result<bool>;

    fn get(&self, id: &ColumnId) -> Result<Option<ColumnDefinition>>;

    /// Definitions whose name starts with `name_prefix`, ordered by name then id.
    fn list(&self, name_prefix: Option<&str>, limit: u64, offset: u64) -> Result<Vec<ColumnDefinition>>;

    fn count(&self, name_prefix: Option<&str>) -> Result<u64>;

    fn truncate(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryColumnStore {
    columns: RwLock<BTreeMap<ColumnId, ColumnDefinition>>,
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_prefix(column: &ColumnDefinition, prefix: Option<&str>) -> bool {
    prefix.map_or(true, |p| column.name.starts_with(p))
}

impl ColumnStore for InMemoryColumnStore {
    fn insert_if_absent(&self, definition: &ColumnDefinition) -> Result<bool> {
        let mut columns = self.columns.write();
        if columns.contains_key(&definition.id) {
            return Ok(false);
        }
        columns.insert(definition.id.clone(), definition.clone());
        Ok(true)
    }

    fn get(&self, id: &ColumnId) -> Result<Option<ColumnDefinition>> {
        Ok(self.columns.read().get(id).cloned())
    }

    fn list(&self, name_prefix: Option<&str>, limit: u64, offset: u64) -> Result<Vec<ColumnDefinition>> {
        let columns = self.columns.read();
        let mut matching: Vec<&ColumnDefinition> = columns
            .values()
            .filter(|c| matches_prefix(c, name_prefix))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn count(&self, name_prefix: Option<&str>) -> Result<u64> {
        Ok(self
            .columns
            .read()
            .values()
            .filter(|c| matches_prefix(c, name_prefix))
            .count() as u64)
    }

    fn truncate(&self) -> Result<()> {
        self.columns.write().clear();
        Ok(())
    }
}
