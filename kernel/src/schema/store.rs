// Schema Binding Storage
//
// Durability contract for the per-table ordered column list.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use super::{Etag, SchemaBinding};
use crate::column::ColumnId;
use crate::error::{Error, Result};
use crate::log::TableId;

/// Storage backend for schema bindings.
///
/// Properties required from implementations:
/// - Whole-list replace, never partial
/// - Compare-and-swap on the etag when one is supplied
/// - Remember every column ever bound to an object until it is unbound
pub trait BindingStore: Send + Sync {
    fn get(&self, object_id: &TableId) -> Result<Option<SchemaBinding>>;

    /// Replace the bound list, stamping a fresh etag.
    ///
    /// When `expected` is set and differs from the stored etag (the unbound
    /// etag for a missing object) the call fails with `ConflictingUpdate`.
    fn replace(
        &self,
        object_id: &TableId,
        column_ids: &[ColumnId],
        expected: Option<Etag>,
    ) -> Result<SchemaBinding>;

    /// Drop the binding, its history and the owner record.
    fn delete(&self, object_id: &TableId) -> Result<bool>;

    /// Objects referencing any of `column_ids`, ordered by id.
    fn objects_bound_to(&self, column_ids: &BTreeSet<ColumnId>, current_only: bool) -> Result<Vec<TableId>>;

    fn truncate(&self) -> Result<()>;
}

#[derive(Debug)]
struct BindingEntry {
    binding: SchemaBinding,
    ever_bound: BTreeSet<ColumnId>,
}

#[derive(Debug, Default)]
pub struct InMemoryBindingStore {
    bindings: RwLock<HashMap<TableId, BindingEntry>>,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingStore for InMemoryBindingStore {
    fn get(&self, object_id: &TableId) -> Result<Option<SchemaBinding>> {
        Ok(self
            .bindings
            .read()
            .get(object_id)
            .map(|entry| entry.binding.clone()))
    }

    fn replace(
        &self,
        object_id: &TableId,
        column_ids: &[ColumnId],
        expected: Option<Etag>,
    ) -> Result<SchemaBinding> {
        let mut bindings = self.bindings.write();
        let current = bindings
            .get(object_id)
            .map(|entry| entry.binding.etag)
            .unwrap_or_else(Etag::unbound);
        if let Some(expected) = expected {
            if expected != current {
                return Err(Error::ConflictingUpdate {
                    object_id: object_id.to_string(),
                    expected,
                    actual: current,
                });
            }
        }

        let binding = SchemaBinding {
            object_id: object_id.clone(),
            column_ids: column_ids.to_vec(),
            etag: Etag::new(),
        };
        let entry = bindings
            .entry(object_id.clone())
            .or_insert_with(|| BindingEntry {
                binding: SchemaBinding::empty(object_id.clone()),
                ever_bound: BTreeSet::new(),
            });
        entry.ever_bound.extend(column_ids.iter().cloned());
        entry.binding = binding.clone();
        Ok(binding)
    }

    fn delete(&self, object_id: &TableId) -> Result<bool> {
        Ok(self.bindings.write().remove(object_id).is_some())
    }

    fn objects_bound_to(&self, column_ids: &BTreeSet<ColumnId>, current_only: bool) -> Result<Vec<TableId>> {
        let bindings = self.bindings.read();
        let mut objects: Vec<TableId> = bindings
            .iter()
            .filter(|(_, entry)| {
                if current_only {
                    entry.binding.column_ids.iter().any(|id| column_ids.contains(id))
                } else {
                    entry.ever_bound.iter().any(|id| column_ids.contains(id))
                }
            })
            .map(|(object_id, _)| object_id.clone())
            .collect();
        objects.sort();
        Ok(objects)
    }

    fn truncate(&self) -> Result<()> {
        self.bindings.write().clear();
        Ok(())
    }
}
