// Sequence Storage
//
// Per-table counters behind row id and version allocation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{IdRange, RowId};
use crate::error::{Error, Result};
use crate::log::{TableId, Version};

/// Counters of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    pub next_row_id: RowId,
    pub next_version: Version,
    /// Highest row id ever handed out, if any.
    pub last_row_id: Option<RowId>,
}

impl SequenceState {
    pub fn new(first_row_id: RowId, first_version: Version) -> Self {
        Self {
            next_row_id: first_row_id,
            next_version: first_version,
            last_row_id: None,
        }
    }
}

/// Storage backend for allocation counters.
///
/// Properties required from implementations:
/// - `reserve` is linearizable per table
/// - The advance is durable before the range is returned
/// - Counters never move backwards
pub trait SequenceStore: Send + Sync {
    /// Reserve `count` row ids and one version for `table_id`.
    ///
    /// `initial` seeds a table that has no counters yet.
    fn reserve(&self, table_id: &TableId, count: u64, initial: SequenceState) -> Result<IdRange>;

    fn peek(&self, table_id: &TableId) -> Result<Option<SequenceState>>;

    /// Raise the counters so the next reservation starts at or above the given values.
    fn advance_to(
        &self,
        table_id: &TableId,
        next_row_id: RowId,
        next_version: Version,
        initial: SequenceState,
    ) -> Result<SequenceState>;

    fn truncate(&self) -> Result<()>;
}

/// Counters kept in memory, one lock per table.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    tables: RwLock<HashMap<TableId, Arc<Mutex<SequenceState>>>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, table_id: &TableId, initial: SequenceState) -> Arc<Mutex<SequenceState>> {
        if let Some(counter) = self.tables.read().get(table_id) {
            return counter.clone();
        }
        self.tables
            .write()
            .entry(table_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(initial)))
            .clone()
    }
}

impl SequenceStore for InMemorySequenceStore {
    fn reserve(&self, table_id: &TableId, count: u64, initial: SequenceState) -> Result<IdRange> {
        let counter = self.counter(table_id, initial);
        let mut state = counter.lock();

        let next_version = state
            .next_version
            .checked_add(1)
            .ok_or_else(|| Error::invalid(format!("version space of table {table_id} is exhausted")))?;
        let next_row_id = state
            .next_row_id
            .checked_add(count)
            .ok_or_else(|| Error::invalid(format!("row id space of table {table_id} is exhausted")))?;

        let range = IdRange {
            min_row_id: (count > 0).then_some(state.next_row_id),
            max_row_id: (count > 0).then(|| next_row_id - 1),
            version: state.next_version,
            max_update_row_id: state.last_row_id,
        };

        state.next_version = next_version;
        state.next_row_id = next_row_id;
        if count > 0 {
            state.last_row_id = range.max_row_id;
        }
        Ok(range)
    }

    fn peek(&self, table_id: &TableId) -> Result<Option<SequenceState>> {
        let counter = self.tables.read().get(table_id).cloned();
        Ok(counter.map(|c| *c.lock()))
    }

    fn advance_to(
        &self,
        table_id: &TableId,
        next_row_id: RowId,
        next_version: Version,
        initial: SequenceState,
    ) -> Result<SequenceState> {
        let counter = self.counter(table_id, initial);
        let mut state = counter.lock();
        if next_row_id > state.next_row_id {
            state.next_row_id = next_row_id;
            state.last_row_id = Some(next_row_id - 1);
        }
        state.next_version = state.next_version.max(next_version);
        Ok(*state)
    }

    fn truncate(&self) -> Result<()> {
        self.tables.write().clear();
        Ok(())
    }
}
