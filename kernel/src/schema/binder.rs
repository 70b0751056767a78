// Schema Binder
//
// Owns the table -> ordered column list association. Every new list
// passes the size invariants before it is written.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{compute_new_schema, BindingStore, ColumnChange, ColumnChangeDetails, Etag, SchemaBinding};
use crate::column::registry::validate_limit;
use crate::column::{ColumnDefinition, ColumnId, ColumnRegistry};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::invariants::SchemaSizeValidator;
use crate::log::TableId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundObjectsPage {
    pub results: Vec<TableId>,
    pub total_count: u64,
}

pub struct SchemaBinder {
    store: Arc<dyn BindingStore>,
    columns: Arc<ColumnRegistry>,
    validator: SchemaSizeValidator,
    config: Arc<EngineConfig>,
}

impl SchemaBinder {
    pub fn new(
        store: Arc<dyn BindingStore>,
        columns: Arc<ColumnRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let validator = SchemaSizeValidator::new(columns.clone(), &config);
        Self {
            store,
            columns,
            validator,
            config,
        }
    }

    pub fn validator(&self) -> &SchemaSizeValidator {
        &self.validator
    }

    /// The current binding, or an empty unbound one.
    pub fn current_binding(&self, object_id: &TableId) -> Result<SchemaBinding> {
        Ok(self
            .store
            .get(object_id)?
            .unwrap_or_else(|| SchemaBinding::empty(object_id.clone())))
    }

    pub fn column_ids_for(&self, object_id: &TableId) -> Result<Vec<ColumnId>> {
        Ok(self.current_binding(object_id)?.column_ids)
    }

    /// Definitions of the current binding, in binding order.
    pub fn columns_for(&self, object_id: &TableId) -> Result<Vec<ColumnDefinition>> {
        let ids = self.column_ids_for(object_id)?;
        self.columns.get_many(&ids, true)
    }

    /// Resolve `select` against the current binding, in the order given.
    pub fn current_columns(
        &self,
        object_id: &TableId,
        select: &[ColumnId],
    ) -> Result<Vec<ColumnDefinition>> {
        let bound = self.columns_for(object_id)?;
        let by_id: HashMap<&ColumnId, &ColumnDefinition> = bound.iter().map(|c| (&c.id, c)).collect();
        select
            .iter()
            .map(|id| {
                by_id.get(id).map(|c| (*c).clone()).ok_or_else(|| {
                    Error::invalid(format!(
                        "column header {id} is not a known column for table {object_id}"
                    ))
                })
            })
            .collect()
    }

    /// Bind `column_ids` to `object_id`.
    ///
    /// Returns `false`, leaving the etag untouched, when the list is unchanged.
    #[instrument(name = "schema::bind", level = "debug", skip(self, column_ids), fields(count = column_ids.len()))]
    pub fn bind(
        &self,
        object_id: &TableId,
        column_ids: &[ColumnId],
        expected: Option<Etag>,
    ) -> Result<bool> {
        let mut seen = HashSet::with_capacity(column_ids.len());
        if let Some(dup) = column_ids.iter().find(|id| !seen.insert(*id)) {
            return Err(Error::invalid(format!(
                "column {dup} appears more than once in the schema"
            )));
        }
        self.validator.validate(column_ids)?;

        let current = self.current_binding(object_id)?;
        if let Some(expected) = expected {
            if expected != current.etag {
                return Err(Error::ConflictingUpdate {
                    object_id: object_id.to_string(),
                    expected,
                    actual: current.etag,
                });
            }
        }
        if current.column_ids == column_ids {
            debug!("schema unchanged");
            return Ok(false);
        }

        let binding = self.store.replace(object_id, column_ids, expected)?;
        info!(etag = %binding.etag, columns = binding.column_ids.len(), "schema bound");
        Ok(true)
    }

    /// Remove every binding and the owner record of a deleted table.
    #[instrument(name = "schema::unbind_all", level = "debug", skip(self))]
    pub fn unbind_all(&self, object_id: &TableId) -> Result<()> {
        let removed = self.store.delete(object_id)?;
        debug!(removed, "schema unbound");
        Ok(())
    }

    /// New column list for `object_id` after `changes`, not yet validated or bound.
    pub fn calculate_new_schema_ids(
        &self,
        object_id: &TableId,
        changes: &[ColumnChange],
    ) -> Result<Vec<ColumnId>> {
        let current = self.column_ids_for(object_id)?;
        compute_new_schema(&current, changes)
    }

    /// Compute, validate and bind the schema produced by `changes`.
    #[instrument(name = "schema::apply_changes", level = "debug", skip(self, changes), fields(changes = changes.len()))]
    pub fn apply_changes(
        &self,
        object_id: &TableId,
        changes: &[ColumnChange],
        expected: Option<Etag>,
    ) -> Result<SchemaBinding> {
        let current = self.current_binding(object_id)?;
        if let Some(expected) = expected {
            if expected != current.etag {
                return Err(Error::ConflictingUpdate {
                    object_id: object_id.to_string(),
                    expected,
                    actual: current.etag,
                });
            }
        }
        let new_ids = compute_new_schema(&current.column_ids, changes)?;
        self.bind(object_id, &new_ids, Some(current.etag))?;
        self.current_binding(object_id)
    }

    /// Old/new definitions for each change.
    pub fn resolve_change_details(&self, changes: &[ColumnChange]) -> Result<Vec<ColumnChangeDetails>> {
        let ids: Vec<ColumnId> = changes
            .iter()
            .flat_map(|c| c.new_column_id.iter().chain(c.old_column_id.iter()))
            .cloned()
            .collect();
        let models = self.columns.get_many(&ids, false)?;
        let by_id: HashMap<&ColumnId, &ColumnDefinition> = models.iter().map(|c| (&c.id, c)).collect();

        Ok(changes
            .iter()
            .map(|change| ColumnChangeDetails {
                old: change
                    .old_column_id
                    .as_ref()
                    .and_then(|id| by_id.get(id).map(|c| (*c).clone())),
                new: change
                    .new_column_id
                    .as_ref()
                    .and_then(|id| by_id.get(id).map(|c| (*c).clone())),
            })
            .collect())
    }

    /// Tables whose binding references any of `column_ids`.
    ///
    /// With `current_only` false, tables that referenced a column at any
    /// point before it was removed are included as well.
    pub fn list_objects_bound_to_columns(
        &self,
        column_ids: &[ColumnId],
        current_only: bool,
        limit: u64,
        offset: u64,
    ) -> Result<BoundObjectsPage> {
        validate_limit(limit, self.config.max_page_size)?;
        let ids: BTreeSet<ColumnId> = column_ids.iter().cloned().collect();
        let objects = self.store.objects_bound_to(&ids, current_only)?;
        let total_count = objects.len() as u64;
        let results = objects
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(BoundObjectsPage {
            results,
            total_count,
        })
    }

    pub(crate) fn truncate(&self) -> Result<()> {
        self.store.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::{CallerContext, StaticAuthorizer};
    use crate::column::{ColumnType, InMemoryColumnStore, NewColumn};
    use crate::schema::InMemoryBindingStore;
    use crate::ErrorKind;

    struct Fixture {
        binder: SchemaBinder,
        ids: Vec<ColumnId>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(EngineConfig::default());
        let columns = Arc::new(ColumnRegistry::new(
            Arc::new(InMemoryColumnStore::new()),
            Arc::new(StaticAuthorizer::permissive()),
            config.clone(),
        ));
        let ids = ["a", "b", "c", "d"]
            .iter()
            .map(|name| {
                columns
                    .create(&CallerContext::user(1), &NewColumn::new(*name, ColumnType::Integer))
                    .unwrap()
                    .id
            })
            .collect();
        Fixture {
            binder: SchemaBinder::new(Arc::new(InMemoryBindingStore::new()), columns, config),
            ids,
        }
    }

    #[test]
    fn bind_reports_whether_anything_changed() {
        let f = fixture();
        let table = TableId::new();

        assert!(f.binder.bind(&table, &f.ids[..2], None).unwrap());
        let etag = f.binder.current_binding(&table).unwrap().etag;
        assert!(!f.binder.bind(&table, &f.ids[..2], None).unwrap());
        assert_eq!(f.binder.current_binding(&table).unwrap().etag, etag);

        assert_eq!(f.binder.column_ids_for(&table).unwrap(), f.ids[..2].to_vec());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let f = fixture();
        let err = f
            .binder
            .bind(&TableId::new(), &[f.ids[0].clone(), f.ids[0].clone()], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn stale_etag_conflicts_and_retry_succeeds() {
        let f = fixture();
        let table = TableId::new();
        f.binder.bind(&table, &f.ids[..1], None).unwrap();
        let stale = f.binder.current_binding(&table).unwrap().etag;
        f.binder.bind(&table, &f.ids[..2], Some(stale)).unwrap();

        let err = f.binder.bind(&table, &f.ids[..3], Some(stale)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingUpdate);

        let fresh = f.binder.current_binding(&table).unwrap().etag;
        assert!(f.binder.bind(&table, &f.ids[..3], Some(fresh)).unwrap());
    }

    #[test]
    fn first_bind_expects_the_unbound_etag() {
        let f = fixture();
        let table = TableId::new();
        assert!(f.binder.bind(&table, &f.ids[..1], Some(Etag::unbound())).unwrap());
        assert!(f.binder.bind(&table, &f.ids[..2], Some(Etag::unbound())).is_err());
    }

    #[test]
    fn apply_changes_updates_in_place() {
        let f = fixture();
        let table = TableId::new();
        f.binder.bind(&table, &[f.ids[0].clone(), f.ids[2].clone()], None).unwrap();

        let binding = f
            .binder
            .apply_changes(&table, &[ColumnChange::update(f.ids[0].clone(), f.ids[1].clone())], None)
            .unwrap();
        assert_eq!(binding.column_ids, vec![f.ids[1].clone(), f.ids[2].clone()]);
    }

    #[test]
    fn unknown_columns_are_not_bound() {
        let f = fixture();
        let table = TableId::new();
        let err = f
            .binder
            .apply_changes(&table, &[ColumnChange::add(ColumnId::from("ghost"))], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.binder.column_ids_for(&table).unwrap().is_empty());
    }

    #[test]
    fn unbind_all_forgets_history() {
        let f = fixture();
        let table = TableId::new();
        f.binder.bind(&table, &f.ids[..2], None).unwrap();
        f.binder.bind(&table, &f.ids[2..3], None).unwrap();

        let current = f
            .binder
            .list_objects_bound_to_columns(&f.ids[..1], true, 10, 0)
            .unwrap();
        assert_eq!(current.total_count, 0);
        let ever = f
            .binder
            .list_objects_bound_to_columns(&f.ids[..1], false, 10, 0)
            .unwrap();
        assert_eq!(ever.results, vec![table.clone()]);

        f.binder.unbind_all(&table).unwrap();
        assert!(f.binder.column_ids_for(&table).unwrap().is_empty());
        let ever = f
            .binder
            .list_objects_bound_to_columns(&f.ids[..1], false, 10, 0)
            .unwrap();
        assert_eq!(ever.total_count, 0);
    }

    #[test]
    fn current_columns_rejects_unbound_headers() {
        let f = fixture();
        let table = TableId::new();
        f.binder.bind(&table, &f.ids[..2], None).unwrap();

        let cols = f
            .binder
            .current_columns(&table, &[f.ids[1].clone(), f.ids[0].clone()])
            .unwrap();
        assert_eq!(cols[0].id, f.ids[1]);

        let err = f.binder.current_columns(&table, &[f.ids[3].clone()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn change_details_resolve_both_sides() {
        let f = fixture();
        let details = f
            .binder
            .resolve_change_details(&[
                ColumnChange::update(f.ids[0].clone(), f.ids[1].clone()),
                ColumnChange::add(f.ids[2].clone()),
            ])
            .unwrap();

        assert_eq!(details[0].old.as_ref().unwrap().name, "a");
        assert_eq!(details[0].new.as_ref().unwrap().name, "b");
        assert!(details[1].old.is_none());
        assert_eq!(details[1].new.as_ref().unwrap().name, "c");
    }
}
