// Row Truth Log
//
// The append-only record of every row set ever committed to a table.
// Replaying its changes in version order reconstructs the table at
// any version.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::auth::CallerContext;
use crate::alloc::{IdAllocator, RowId};
use crate::column::{ColumnDefinition, ColumnId};
use crate::error::{Error, Result};

pub mod store;

pub use store::{InMemoryRowTruthStore, RowTruthStore};

/// Logical version of a table.
pub type Version = u64;

/// Stable identifier for a table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub Uuid);

impl TableId {
    pub fn new() -> Self {
        TableId(Uuid::new_v4())
    }
}

impl Default for TableId {
    fn default() -> Self {
        TableId::new()
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of a row set.
///
/// A row without `row_id` is new. A row with `row_id` and values updates
/// that row; with `row_id` and no values it deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(default)]
    pub row_id: Option<RowId>,
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub values: Vec<Option<String>>,
}

impl Row {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            row_id: None,
            version: None,
            values: values.into_iter().map(|v| v.map(Into::into)).collect(),
        }
    }

    pub fn update<I, S>(row_id: RowId, values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            row_id: Some(row_id),
            ..Row::new(values)
        }
    }

    pub fn delete(row_id: RowId) -> Self {
        Self {
            row_id: Some(row_id),
            version: None,
            values: Vec::new(),
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.row_id.is_some() && self.values.is_empty()
    }
}

/// A batch of rows sharing one header list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSet {
    pub table_id: TableId,
    pub headers: Vec<ColumnId>,
    pub rows: Vec<Row>,
}

/// Locates the serialized rows of one change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub table_id: TableId,
    pub version: Version,
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table_id, self.version)
    }
}

/// Durable record of one committed row set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRowChange {
    pub table_id: TableId,
    pub version: Version,
    pub row_count: u64,
    /// Ids allocated to new rows of this change, inclusive.
    pub min_row_id: Option<RowId>,
    pub max_row_id: Option<RowId>,
    pub column_ids: Vec<ColumnId>,
    pub created_by: u64,
    pub created_on_millis: u64,
    pub content_key: ContentKey,
}

/// What an append hands back to the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowReferenceSet {
    pub table_id: TableId,
    pub version: Version,
    pub headers: Vec<ColumnId>,
    pub row_ids: Vec<RowId>,
}

pub struct RowTruthLog {
    store: Arc<dyn RowTruthStore>,
    allocator: Arc<IdAllocator>,
}

impl RowTruthLog {
    pub fn new(store: Arc<dyn RowTruthStore>, allocator: Arc<IdAllocator>) -> Self {
        Self { store, allocator }
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// Append `delta` to `table_id`.
    ///
    /// `schema` is the binding read immediately before the call. Nothing is
    /// reserved or written unless the whole row set validates against it.
    #[instrument(name = "log::append", level = "debug", skip(self, caller, schema, delta), fields(rows = delta.rows.len()))]
    pub fn append_row_set(
        &self,
        caller: &CallerContext,
        table_id: &TableId,
        schema: &[ColumnDefinition],
        delta: &RowSet,
    ) -> Result<RowReferenceSet> {
        let columns = validate_headers(table_id, schema, delta)?;
        let known = self.allocator.state(table_id)?.last_row_id;
        let new_rows = validate_rows(&columns, delta, known)?;

        let range = self.allocator.reserve_id_range(table_id, new_rows)?;
        let mut fresh_ids = range.row_ids();

        let mut rows = Vec::with_capacity(delta.rows.len());
        for row in &delta.rows {
            let row_id = match row.row_id {
                Some(id) => id,
                None => fresh_ids
                    .next()
                    .ok_or_else(|| Error::Datastore("reserved id range is too small".into()))?,
            };
            rows.push(Row {
                row_id: Some(row_id),
                version: Some(range.version),
                values: row.values.clone(),
            });
        }
        let row_ids: Vec<RowId> = rows.iter().filter_map(|r| r.row_id).collect();

        let stamped = RowSet {
            table_id: table_id.clone(),
            headers: delta.headers.clone(),
            rows,
        };
        let content_key = ContentKey {
            table_id: table_id.clone(),
            version: range.version,
        };
        let change = TableRowChange {
            table_id: table_id.clone(),
            version: range.version,
            row_count: stamped.rows.len() as u64,
            min_row_id: range.min_row_id,
            max_row_id: range.max_row_id,
            column_ids: stamped.headers.clone(),
            created_by: caller.user_id,
            created_on_millis: now_millis(),
            content_key,
        };

        let payload = serde_json::to_vec(&stamped)?;
        if let Err(err) = self.store.insert(&change, payload) {
            warn!(version = range.version, error = %err, "row set append failed after reservation");
            return Err(err);
        }
        info!(version = change.version, rows = change.row_count, "row set appended");

        Ok(RowReferenceSet {
            table_id: table_id.clone(),
            version: change.version,
            headers: stamped.headers,
            row_ids,
        })
    }

    /// Exactly the rows committed under `version`.
    pub fn get_row_set(&self, table_id: &TableId, version: Version) -> Result<RowSet> {
        let change = self.get_change(table_id, version)?;
        let payload = self.store.get_payload(&change.content_key)?.ok_or_else(|| {
            Error::Datastore(format!("payload {} is missing", change.content_key))
        })?;
        Ok(serde_json::from_slice(&payload)?)
    }

    pub fn get_change(&self, table_id: &TableId, version: Version) -> Result<TableRowChange> {
        self.store.get_change(table_id, version)?.ok_or_else(|| {
            Error::not_found(format!("version {version} of table {table_id} does not exist"))
        })
    }

    /// The complete ordered history of `table_id`.
    pub fn list_change_history(&self, table_id: &TableId) -> Result<Vec<TableRowChange>> {
        self.store.list_changes(table_id)
    }

    pub fn latest_version(&self, table_id: &TableId) -> Result<Option<Version>> {
        self.store.latest_version(table_id)
    }

    /// Write a change taken from another log, keeping its ids and version.
    ///
    /// The payload must be exactly what an append would have committed for
    /// `change`; nothing is written otherwise.
    pub(crate) fn restore(&self, change: &TableRowChange, rows: &RowSet) -> Result<()> {
        validate_restored(change, rows)?;
        if let Some(latest) = self.latest_version(&change.table_id)? {
            if change.version <= latest {
                return Err(Error::invalid(format!(
                    "cannot restore version {} onto table {} at version {latest}",
                    change.version, change.table_id
                )));
            }
        }

        let mut change = change.clone();
        change.content_key = ContentKey {
            table_id: change.table_id.clone(),
            version: change.version,
        };
        let max_row_id = rows.rows.iter().filter_map(|r| r.row_id).max();
        self.store.insert(&change, serde_json::to_vec(rows)?)?;

        let next_row_id = max_row_id
            .into_iter()
            .chain(change.max_row_id)
            .max()
            .map_or(0, |id| id.saturating_add(1));
        self.allocator
            .advance_to(&change.table_id, next_row_id, change.version.saturating_add(1))?;
        debug!(version = change.version, "change restored");
        Ok(())
    }

    /// Remove all row history. Administrative use only.
    pub(crate) fn truncate_all(&self) -> Result<()> {
        self.store.truncate()?;
        self.allocator.truncate()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Resolve the headers of `delta` against `schema`, in header order.
fn validate_headers<'a>(
    table_id: &TableId,
    schema: &'a [ColumnDefinition],
    delta: &RowSet,
) -> Result<Vec<&'a ColumnDefinition>> {
    if &delta.table_id != table_id {
        return Err(Error::invalid(format!(
            "row set targets table {} but was appended to {table_id}",
            delta.table_id
        )));
    }
    if delta.rows.is_empty() {
        return Err(Error::invalid("a row set must contain at least one row"));
    }

    let mut seen = HashSet::with_capacity(delta.headers.len());
    delta
        .headers
        .iter()
        .map(|header| {
            if !seen.insert(header) {
                return Err(Error::invalid(format!("header {header} appears more than once")));
            }
            schema.iter().find(|c| &c.id == header).ok_or_else(|| {
                Error::invalid(format!(
                    "column {header} is not a current column of table {table_id}"
                ))
            })
        })
        .collect()
}

/// Check every row and return how many new row ids are needed.
fn validate_rows(columns: &[&ColumnDefinition], delta: &RowSet, known: Option<RowId>) -> Result<u64> {
    let mut new_rows = 0u64;
    let mut touched = HashSet::new();
    for (index, row) in delta.rows.iter().enumerate() {
        if let Some(id) = row.row_id {
            if known.map_or(true, |last| id > last) {
                return Err(Error::invalid(format!(
                    "row id {id} has not been allocated for table {}",
                    delta.table_id
                )));
            }
            if !touched.insert(id) {
                return Err(Error::invalid(format!("row id {id} appears more than once")));
            }
            if row.is_deletion() {
                continue;
            }
        } else {
            new_rows += 1;
        }

        if columns.is_empty() {
            return Err(Error::invalid("a row set without headers may only delete rows"));
        }
        if row.values.len() != columns.len() {
            return Err(Error::invalid(format!(
                "row {index} has {} values but the row set has {} headers",
                row.values.len(),
                columns.len()
            )));
        }
        for (column, value) in columns.iter().zip(&row.values) {
            column.validate_value(value.as_deref())?;
        }
    }
    Ok(new_rows)
}

/// Check a restored payload against the change that describes it.
fn validate_restored(change: &TableRowChange, rows: &RowSet) -> Result<()> {
    let version = change.version;
    if rows.table_id != change.table_id {
        return Err(Error::invalid("restored rows belong to a different table"));
    }
    if rows.rows.is_empty() {
        return Err(Error::invalid(format!("restored version {version} has no rows")));
    }
    if change.row_count != rows.rows.len() as u64 {
        return Err(Error::invalid(format!(
            "restored version {version} claims {} rows but carries {}",
            change.row_count,
            rows.rows.len()
        )));
    }
    if change.column_ids != rows.headers {
        return Err(Error::invalid(format!(
            "restored version {version} lists different columns than its rows"
        )));
    }
    if let (Some(min), Some(max)) = (change.min_row_id, change.max_row_id) {
        if min > max {
            return Err(Error::invalid(format!(
                "restored version {version} has row id bounds {min}..{max}"
            )));
        }
    }

    let mut seen = HashSet::with_capacity(rows.headers.len());
    if let Some(dup) = rows.headers.iter().find(|h| !seen.insert(*h)) {
        return Err(Error::invalid(format!("header {dup} appears more than once")));
    }

    let mut touched = HashSet::with_capacity(rows.rows.len());
    for (index, row) in rows.rows.iter().enumerate() {
        let Some(id) = row.row_id else {
            return Err(Error::invalid(format!("restored row {index} has no row id")));
        };
        if !touched.insert(id) {
            return Err(Error::invalid(format!("row id {id} appears more than once")));
        }
        if row.version != Some(version) {
            return Err(Error::invalid(format!(
                "restored row {id} is stamped {:?} inside version {version}",
                row.version
            )));
        }
        if row.is_deletion() {
            continue;
        }
        if rows.headers.is_empty() {
            return Err(Error::invalid("a row set without headers may only delete rows"));
        }
        if row.values.len() != rows.headers.len() {
            return Err(Error::invalid(format!(
                "row {id} has {} values but the row set has {} headers",
                row.values.len(),
                rows.headers.len()
            )));
        }
    }
    Ok(())
}
