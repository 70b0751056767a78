// History Backup & Restore
//
// Streams the complete history of a table as chunks holding at most
// a caller-chosen number of rows, and replays those chunks into an
// empty table keeping every original id and version.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::log::{RowSet, RowTruthLog, TableId, TableRowChange, Version};

/// One committed change with its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub change: TableRowChange,
    pub rows: RowSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupChunk {
    pub table_id: TableId,
    /// Position of this chunk in the export, from zero.
    pub sequence: u64,
    pub entries: Vec<BackupEntry>,
}

impl BackupChunk {
    pub fn row_count(&self) -> usize {
        self.entries.iter().map(|e| e.rows.rows.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub table_id: TableId,
    pub versions: u64,
    pub rows: u64,
    pub latest_version: Option<Version>,
}

/// Export the history of `table_id`, handing each chunk to `sink` as soon as it is full.
///
/// A single row set larger than `max_rows_per_chunk` occupies a chunk of
/// its own.
#[instrument(name = "backup::export", level = "debug", skip(log, sink))]
pub fn export_table_with<F>(
    log: &RowTruthLog,
    table_id: &TableId,
    max_rows_per_chunk: usize,
    mut sink: F,
) -> Result<u64>
where
    F: FnMut(BackupChunk) -> Result<()>,
{
    if max_rows_per_chunk == 0 {
        return Err(Error::invalid("maximum rows per chunk must be greater than zero"));
    }

    let mut sequence = 0u64;
    let mut entries: Vec<BackupEntry> = Vec::new();
    let mut rows_in_chunk = 0usize;

    for change in log.list_change_history(table_id)? {
        let rows = log.get_row_set(table_id, change.version)?;
        let count = rows.rows.len();
        if !entries.is_empty() && rows_in_chunk + count > max_rows_per_chunk {
            sink(BackupChunk {
                table_id: table_id.clone(),
                sequence,
                entries: std::mem::take(&mut entries),
            })?;
            sequence += 1;
            rows_in_chunk = 0;
        }
        rows_in_chunk += count;
        entries.push(BackupEntry { change, rows });
    }
    if !entries.is_empty() {
        sink(BackupChunk {
            table_id: table_id.clone(),
            sequence,
            entries,
        })?;
        sequence += 1;
    }
    info!(chunks = sequence, "table history exported");
    Ok(sequence)
}

pub fn export_table(log: &RowTruthLog, table_id: &TableId, max_rows_per_chunk: usize) -> Result<Vec<BackupChunk>> {
    let mut chunks = Vec::new();
    export_table_with(log, table_id, max_rows_per_chunk, |chunk| {
        chunks.push(chunk);
        Ok(())
    })?;
    Ok(chunks)
}

/// Replay exported chunks into a table that has no history yet.
#[instrument(name = "backup::restore", level = "debug", skip_all)]
pub fn restore_table<I>(log: &RowTruthLog, chunks: I) -> Result<Option<RestoreSummary>>
where
    I: IntoIterator<Item = BackupChunk>,
{
    let mut summary: Option<RestoreSummary> = None;
    let mut expected_sequence = 0u64;

    for chunk in chunks {
        if chunk.sequence != expected_sequence {
            return Err(Error::invalid(format!(
                "backup chunk {} arrived where chunk {expected_sequence} was expected",
                chunk.sequence
            )));
        }
        expected_sequence += 1;

        if summary.is_none() && log.latest_version(&chunk.table_id)?.is_some() {
            return Err(Error::invalid(format!(
                "table {} already has history",
                chunk.table_id
            )));
        }
        let current = summary.get_or_insert_with(|| RestoreSummary {
            table_id: chunk.table_id.clone(),
            versions: 0,
            rows: 0,
            latest_version: None,
        });
        if current.table_id != chunk.table_id {
            return Err(Error::invalid("backup chunks belong to more than one table"));
        }

        for entry in &chunk.entries {
            if entry.change.table_id != current.table_id {
                return Err(Error::invalid("backup entry belongs to a different table"));
            }
            log.restore(&entry.change, &entry.rows)?;
            current.versions += 1;
            current.rows += entry.rows.rows.len() as u64;
            current.latest_version = Some(entry.change.version);
        }
    }

    if let Some(summary) = &summary {
        info!(table = %summary.table_id, versions = summary.versions, "table history restored");
    }
    Ok(summary)
}
