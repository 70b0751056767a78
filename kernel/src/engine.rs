// Table Engine
//
// Wires the column registry, schema binder, allocator and row truth
// log around explicit collaborators, and performs the caller checks
// that sit in front of them.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::adapters::auth::{AccessType, Authorizer, CallerContext, ObjectType};
use crate::alloc::{IdAllocator, IdRange, InMemorySequenceStore, SequenceStore};
use crate::backup::{self, BackupChunk, RestoreSummary};
use crate::column::{
    ColumnDefinition, ColumnId, ColumnPage, ColumnRegistry, ColumnStore, InMemoryColumnStore, NewColumn,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::log::{
    InMemoryRowTruthStore, RowReferenceSet, RowSet, RowTruthLog, RowTruthStore, TableId, TableRowChange, Version,
};
use crate::replay::{self, TableSnapshot};
use crate::schema::{
    compute_new_schema, BindingStore, BoundObjectsPage, ColumnChange, ColumnChangeDetails, Etag,
    InMemoryBindingStore, SchemaBinder, SchemaBinding,
};

/// Backing stores and the authorizer an engine instance owns.
pub struct Collaborators {
    pub columns: Arc<dyn ColumnStore>,
    pub bindings: Arc<dyn BindingStore>,
    pub sequences: Arc<dyn SequenceStore>,
    pub rows: Arc<dyn RowTruthStore>,
    pub authorizer: Arc<dyn Authorizer>,
}

impl Collaborators {
    pub fn in_memory(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            columns: Arc::new(InMemoryColumnStore::new()),
            bindings: Arc::new(InMemoryBindingStore::new()),
            sequences: Arc::new(InMemorySequenceStore::new()),
            rows: Arc::new(InMemoryRowTruthStore::new()),
            authorizer,
        }
    }
}

pub struct TableEngine {
    config: Arc<EngineConfig>,
    authorizer: Arc<dyn Authorizer>,
    columns: Arc<ColumnRegistry>,
    binder: SchemaBinder,
    log: RowTruthLog,
}

impl TableEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let columns = Arc::new(ColumnRegistry::new(
            collaborators.columns,
            collaborators.authorizer.clone(),
            config.clone(),
        ));
        let binder = SchemaBinder::new(collaborators.bindings, columns.clone(), config.clone());
        let allocator = Arc::new(IdAllocator::new(collaborators.sequences, &config));
        let log = RowTruthLog::new(collaborators.rows, allocator);
        Self {
            config,
            authorizer: collaborators.authorizer,
            columns,
            binder,
            log,
        }
    }

    pub fn in_memory(config: EngineConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        Self::new(config, Collaborators::in_memory(authorizer))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self) -> &RowTruthLog {
        &self.log
    }

    fn require_access(&self, caller: &CallerContext, table_id: &TableId, access: AccessType) -> Result<()> {
        if self
            .authorizer
            .can_access(caller, table_id, ObjectType::Entity, access)
        {
            Ok(())
        } else {
            Err(Error::unauthorized(format!(
                "user {} lacks {access:?} access on table {table_id}",
                caller.user_id
            )))
        }
    }

    // ----------------------------
    // Rows
    // ----------------------------

    pub fn reserve_id_range(&self, table_id: &TableId, count: u64) -> Result<IdRange> {
        self.log.allocator().reserve_id_range(table_id, count)
    }

    /// Append `delta` validated against the supplied `schema`.
    pub fn append_row_set(
        &self,
        caller: &CallerContext,
        table_id: &TableId,
        schema: &[ColumnDefinition],
        delta: &RowSet,
    ) -> Result<RowReferenceSet> {
        self.require_access(caller, table_id, AccessType::Update)?;
        self.log.append_row_set(caller, table_id, schema, delta)
    }

    /// Append `delta` validated against the binding visible right now.
    #[instrument(name = "engine::append_rows", level = "debug", skip(self, caller, delta))]
    pub fn append_rows(&self, caller: &CallerContext, table_id: &TableId, delta: &RowSet) -> Result<RowReferenceSet> {
        self.require_access(caller, table_id, AccessType::Update)?;
        let schema = self.binder.columns_for(table_id)?;
        self.log.append_row_set(caller, table_id, &schema, delta)
    }

    pub fn get_row_set(&self, table_id: &TableId, version: Version) -> Result<RowSet> {
        self.log.get_row_set(table_id, version)
    }

    pub fn list_change_history(&self, table_id: &TableId) -> Result<Vec<TableRowChange>> {
        self.log.list_change_history(table_id)
    }

    pub fn latest_version(&self, table_id: &TableId) -> Result<Option<Version>> {
        self.log.latest_version(table_id)
    }

    pub fn replay(&self, table_id: &TableId, up_to: Option<Version>) -> Result<TableSnapshot> {
        replay::replay_table(&self.log, table_id, up_to)
    }

    pub fn export_table(&self, table_id: &TableId, max_rows_per_chunk: usize) -> Result<Vec<BackupChunk>> {
        backup::export_table(&self.log, table_id, max_rows_per_chunk)
    }

    pub fn restore_table<I>(&self, chunks: I) -> Result<Option<RestoreSummary>>
    where
        I: IntoIterator<Item = BackupChunk>,
    {
        backup::restore_table(&self.log, chunks)
    }

    // ----------------------------
    // Columns
    // ----------------------------

    pub fn create_column(&self, caller: &CallerContext, column: &NewColumn) -> Result<ColumnDefinition> {
        self.columns.create(caller, column)
    }

    pub fn create_columns(&self, caller: &CallerContext, columns: &[NewColumn]) -> Result<Vec<ColumnDefinition>> {
        self.columns.create_many(caller, columns)
    }

    pub fn get_column(&self, id: &ColumnId) -> Result<ColumnDefinition> {
        self.columns.get(id)
    }

    pub fn get_columns(&self, ids: &[ColumnId], keep_order: bool) -> Result<Vec<ColumnDefinition>> {
        self.columns.get_many(ids, keep_order)
    }

    pub fn list_columns(&self, name_prefix: Option<&str>, limit: u64, offset: u64) -> Result<ColumnPage> {
        self.columns.list(name_prefix, limit, offset)
    }

    /// Bound columns of a table the caller may read.
    pub fn get_columns_for_table(&self, caller: &CallerContext, table_id: &TableId) -> Result<Vec<ColumnDefinition>> {
        self.require_access(caller, table_id, AccessType::Read)?;
        self.binder.columns_for(table_id)
    }

    pub fn get_current_columns(
        &self,
        caller: &CallerContext,
        table_id: &TableId,
        select: &[ColumnId],
    ) -> Result<Vec<ColumnDefinition>> {
        self.require_access(caller, table_id, AccessType::Read)?;
        self.binder.current_columns(table_id, select)
    }

    // ----------------------------
    // Schema
    // ----------------------------

    pub fn schema_binding(&self, table_id: &TableId) -> Result<SchemaBinding> {
        self.binder.current_binding(table_id)
    }

    pub fn column_ids_for_table(&self, table_id: &TableId) -> Result<Vec<ColumnId>> {
        self.binder.column_ids_for(table_id)
    }

    pub fn bind_schema(&self, caller: &CallerContext, column_ids: &[ColumnId], table_id: &TableId) -> Result<bool> {
        self.require_access(caller, table_id, AccessType::Update)?;
        self.binder.bind(table_id, column_ids, None)
    }

    /// Bind only if the binding still carries `expected`.
    pub fn bind_schema_if(
        &self,
        caller: &CallerContext,
        column_ids: &[ColumnId],
        table_id: &TableId,
        expected: Etag,
    ) -> Result<bool> {
        self.require_access(caller, table_id, AccessType::Update)?;
        self.binder.bind(table_id, column_ids, Some(expected))
    }

    pub fn compute_new_schema(&self, current: &[ColumnId], changes: &[ColumnChange]) -> Result<Vec<ColumnId>> {
        compute_new_schema(current, changes)
    }

    pub fn calculate_new_schema(&self, table_id: &TableId, changes: &[ColumnChange]) -> Result<Vec<ColumnId>> {
        self.binder.calculate_new_schema_ids(table_id, changes)
    }

    pub fn apply_schema_changes(
        &self,
        caller: &CallerContext,
        table_id: &TableId,
        changes: &[ColumnChange],
        expected: Option<Etag>,
    ) -> Result<SchemaBinding> {
        self.require_access(caller, table_id, AccessType::Update)?;
        self.binder.apply_changes(table_id, changes, expected)
    }

    pub fn resolve_change_details(&self, changes: &[ColumnChange]) -> Result<Vec<ColumnChangeDetails>> {
        self.binder.resolve_change_details(changes)
    }

    pub fn validate_schema_size(&self, column_ids: &[ColumnId]) -> Result<Vec<ColumnDefinition>> {
        self.binder.validator().validate(column_ids)
    }

    pub fn list_objects_bound_to_columns(
        &self,
        column_ids: &[ColumnId],
        current_only: bool,
        limit: u64,
        offset: u64,
    ) -> Result<BoundObjectsPage> {
        self.binder
            .list_objects_bound_to_columns(column_ids, current_only, limit, offset)
    }

    /// Cascade step of table deletion. Shared column definitions are kept.
    pub fn unbind_all(&self, table_id: &TableId) -> Result<()> {
        self.binder.unbind_all(table_id)
    }

    // ----------------------------
    // Administration
    // ----------------------------

    /// Irreversibly wipe all row and schema history.
    ///
    /// Not safe to run alongside writers; callers serialize it themselves.
    #[instrument(name = "engine::truncate_all", level = "info", skip(self, caller), fields(user = caller.user_id))]
    pub fn truncate_all(&self, caller: &CallerContext) -> Result<()> {
        if !caller.admin {
            return Err(Error::unauthorized("only an administrator can truncate all table data"));
        }
        warn!("truncating all row and schema history");
        self.log.truncate_all()?;
        self.binder.truncate()?;
        self.columns.truncate()?;
        info!("truncate complete");
        Ok(())
    }
}
