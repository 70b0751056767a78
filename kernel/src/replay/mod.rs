// Deterministic Replay Engine
//
// Replays row-truth history in version order to derive table
// content, and lets secondary consumers follow the log by
// remembering the highest version they applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::alloc::RowId;
use crate::column::ColumnId;
use crate::error::Result;
use crate::log::{RowSet, RowTruthLog, TableId, TableRowChange, Version};

/// Latest values of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub version: Version,
    pub values: BTreeMap<ColumnId, Option<String>>,
}

/// Table content derived from replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table_id: TableId,
    /// Highest version applied, `None` before the first change.
    pub version: Option<Version>,
    pub rows: BTreeMap<RowId, SnapshotRow>,
}

impl TableSnapshot {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            version: None,
            rows: BTreeMap::new(),
        }
    }

    /// Apply one committed row set. Re-applying an applied version is a no-op.
    pub fn apply(&mut self, version: Version, rows: &RowSet) {
        if self.version.is_some_and(|applied| version <= applied) {
            return;
        }
        for row in &rows.rows {
            let Some(row_id) = row.row_id else {
                continue;
            };
            if row.is_deletion() {
                self.rows.remove(&row_id);
                continue;
            }
            let entry = self.rows.entry(row_id).or_insert_with(|| SnapshotRow {
                version,
                values: BTreeMap::new(),
            });
            entry.version = version;
            for (header, value) in rows.headers.iter().zip(&row.values) {
                entry.values.insert(header.clone(), value.clone());
            }
        }
        self.version = Some(version);
    }

    /// Rows projected onto `headers`; missing cells are `None`.
    pub fn project(&self, headers: &[ColumnId]) -> Vec<(RowId, Vec<Option<String>>)> {
        self.rows
            .iter()
            .map(|(row_id, row)| {
                let values = headers
                    .iter()
                    .map(|h| row.values.get(h).cloned().flatten())
                    .collect();
                (*row_id, values)
            })
            .collect()
    }
}

/// Replay the history of `table_id`, optionally stopping after `up_to`.
#[instrument(name = "replay::table", level = "debug", skip(log))]
pub fn replay_table(log: &RowTruthLog, table_id: &TableId, up_to: Option<Version>) -> Result<TableSnapshot> {
    let mut snapshot = TableSnapshot::new(table_id.clone());
    for change in log.list_change_history(table_id)? {
        if up_to.is_some_and(|limit| change.version > limit) {
            break;
        }
        let rows = log.get_row_set(table_id, change.version)?;
        snapshot.apply(change.version, &rows);
    }
    debug!(version = ?snapshot.version, rows = snapshot.rows.len(), "table replayed");
    Ok(snapshot)
}

/// Position of a secondary consumer in the log of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub table_id: TableId,
    pub applied_version: Option<Version>,
}

impl SyncCursor {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            applied_version: None,
        }
    }

    /// Hand every change newer than the cursor to `apply`, in version order.
    ///
    /// The cursor only moves past a change once `apply` succeeds, so a failed
    /// poll is retried from the same change next time. Returns the number of
    /// changes applied.
    pub fn poll<F>(&mut self, log: &RowTruthLog, mut apply: F) -> Result<usize>
    where
        F: FnMut(&TableRowChange, &RowSet) -> Result<()>,
    {
        let mut applied = 0;
        for change in log.list_change_history(&self.table_id)? {
            if self.applied_version.is_some_and(|v| change.version <= v) {
                continue;
            }
            let rows = log.get_row_set(&self.table_id, change.version)?;
            apply(&change, &rows)?;
            self.applied_version = Some(change.version);
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::auth::CallerContext;
    use crate::alloc::{IdAllocator, InMemorySequenceStore};
    use crate::column::{ColumnDefinition, ColumnType, NewColumn};
    use crate::config::EngineConfig;
    use crate::error::Error;
    use crate::log::{InMemoryRowTruthStore, Row};

    struct Fixture {
        log: RowTruthLog,
        schema: Vec<ColumnDefinition>,
        table: TableId,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::default();
        let allocator = Arc::new(IdAllocator::new(Arc::new(InMemorySequenceStore::new()), &config));
        Fixture {
            log: RowTruthLog::new(Arc::new(InMemoryRowTruthStore::new()), allocator),
            schema: vec![
                ColumnDefinition::from_new(&NewColumn::new("a", ColumnType::Integer), &config).unwrap(),
                ColumnDefinition::from_new(&NewColumn::new("b", ColumnType::String), &config).unwrap(),
            ],
            table: TableId::new(),
        }
    }

    impl Fixture {
        fn append(&self, headers: Vec<ColumnId>, rows: Vec<Row>) -> Version {
            self.log
                .append_row_set(
                    &CallerContext::user(1),
                    &self.table,
                    &self.schema,
                    &RowSet {
                        table_id: self.table.clone(),
                        headers,
                        rows,
                    },
                )
                .unwrap()
                .version
        }
    }

    #[test]
    fn replay_merges_updates_and_drops_deletions() {
        let f = fixture();
        let a = f.schema[0].id.clone();
        let b = f.schema[1].id.clone();

        f.append(
            vec![a.clone(), b.clone()],
            vec![Row::new([Some("1"), Some("x")]), Row::new([Some("2"), Some("y")])],
        );
        f.append(vec![b.clone()], vec![Row::update(1, [Some("z")])]);
        f.append(vec![], vec![Row::delete(2)]);

        let current = replay_table(&f.log, &f.table, None).unwrap();
        assert_eq!(current.version, Some(3));
        assert_eq!(
            current.project(&[a.clone(), b.clone()]),
            vec![(1, vec![Some("1".to_string()), Some("z".to_string())])]
        );
        assert_eq!(current.rows[&1].version, 2);

        let historical = replay_table(&f.log, &f.table, Some(1)).unwrap();
        assert_eq!(historical.rows.len(), 2);
        assert_eq!(historical.rows[&1].values[&b], Some("x".to_string()));
    }

    #[test]
    fn reapplying_a_version_is_idempotent() {
        let f = fixture();
        let a = f.schema[0].id.clone();
        f.append(vec![a.clone()], vec![Row::new([Some("1")])]);

        let rows = f.log.get_row_set(&f.table, 1).unwrap();
        let mut snapshot = TableSnapshot::new(f.table.clone());
        snapshot.apply(1, &rows);
        let once = snapshot.clone();
        snapshot.apply(1, &rows);
        assert_eq!(snapshot, once);
    }

    #[test]
    fn cursor_only_visits_new_versions() {
        let f = fixture();
        let a = f.schema[0].id.clone();
        f.append(vec![a.clone()], vec![Row::new([Some("1")])]);
        f.append(vec![a.clone()], vec![Row::new([Some("2")])]);

        let mut cursor = SyncCursor::new(f.table.clone());
        let mut seen = Vec::new();
        assert_eq!(
            cursor
                .poll(&f.log, |change, _| {
                    seen.push(change.version);
                    Ok(())
                })
                .unwrap(),
            2
        );

        f.append(vec![a], vec![Row::new([Some("3")])]);
        cursor
            .poll(&f.log, |change, _| {
                seen.push(change.version);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(cursor.applied_version, Some(3));
    }

    #[test]
    fn failed_apply_is_retried() {
        let f = fixture();
        let a = f.schema[0].id.clone();
        f.append(vec![a.clone()], vec![Row::new([Some("1")])]);
        f.append(vec![a], vec![Row::new([Some("2")])]);

        let mut cursor = SyncCursor::new(f.table.clone());
        let err = cursor.poll(&f.log, |change, _| {
            if change.version == 2 {
                Err(Error::Datastore("index unavailable".into()))
            } else {
                Ok(())
            }
        });
        assert!(err.is_err());
        assert_eq!(cursor.applied_version, Some(1));

        let mut retried = Vec::new();
        cursor
            .poll(&f.log, |change, _| {
                retried.push(change.version);
                Ok(())
            })
            .unwrap();
        assert_eq!(retried, vec![2]);
    }
}
