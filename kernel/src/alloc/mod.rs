// Row ID / Version Allocator
//
// Hands out non-overlapping row id ranges and strictly increasing
// version numbers per table. Every reservation is final: ids and
// versions of an append that later fails are never reused.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::log::{TableId, Version};

pub mod store;

pub use store::{InMemorySequenceStore, SequenceState, SequenceStore};

/// Identifier of one row within a table.
pub type RowId = u64;

/// Ids and version reserved for one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    /// First reserved row id. `None` when no row ids were requested.
    pub min_row_id: Option<RowId>,
    /// Last reserved row id, inclusive.
    pub max_row_id: Option<RowId>,
    pub version: Version,
    /// Highest id allocated before this range; the bound for row updates.
    pub max_update_row_id: Option<RowId>,
}

impl IdRange {
    /// Number of reserved row ids. Inverted bounds count as empty.
    pub fn len(&self) -> u64 {
        match (self.min_row_id, self.max_row_id) {
            (Some(min), Some(max)) => max.checked_sub(min).map_or(0, |d| d.saturating_add(1)),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row_ids(&self) -> impl Iterator<Item = RowId> {
        let (start, end) = match (self.min_row_id, self.max_row_id) {
            (Some(min), Some(max)) => (min, max.saturating_add(1)),
            _ => (0, 0),
        };
        start..end
    }
}

pub struct IdAllocator {
    store: Arc<dyn SequenceStore>,
    initial: SequenceState,
}

impl IdAllocator {
    pub fn new(store: Arc<dyn SequenceStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            initial: SequenceState::new(config.first_row_id, config.first_version),
        }
    }

    #[instrument(name = "alloc::reserve", level = "debug", skip(self))]
    pub fn reserve_id_range(&self, table_id: &TableId, count: u64) -> Result<IdRange> {
        let range = self.store.reserve(table_id, count, self.initial)?;
        debug!(
            version = range.version,
            min_row_id = ?range.min_row_id,
            max_row_id = ?range.max_row_id,
            "id range reserved"
        );
        Ok(range)
    }

    /// Counters as they stand, without reserving anything.
    pub fn state(&self, table_id: &TableId) -> Result<SequenceState> {
        Ok(self.store.peek(table_id)?.unwrap_or(self.initial))
    }

    pub fn advance_to(&self, table_id: &TableId, next_row_id: RowId, next_version: Version) -> Result<SequenceState> {
        self.store
            .advance_to(table_id, next_row_id, next_version, self.initial)
    }

    pub(crate) fn truncate(&self) -> Result<()> {
        self.store.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn allocator(first_row_id: u64) -> IdAllocator {
        let config = EngineConfig {
            first_row_id,
            ..EngineConfig::default()
        };
        IdAllocator::new(Arc::new(InMemorySequenceStore::new()), &config)
    }

    #[test]
    fn extreme_bounds_do_not_overflow() {
        let range = |min, max| IdRange {
            min_row_id: Some(min),
            max_row_id: Some(max),
            version: 1,
            max_update_row_id: None,
        };
        assert_eq!(range(0, u64::MAX).len(), u64::MAX);
        assert_eq!(range(7, 3).len(), 0);
        assert!(range(7, 3).is_empty());
        assert_eq!(range(4, 4).len(), 1);
    }

    #[test]
    fn ranges_and_versions_advance() {
        let alloc = allocator(1001);
        let table = TableId::new();

        let first = alloc.reserve_id_range(&table, 2).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.row_ids().collect::<Vec<_>>(), vec![1001, 1002]);
        assert_eq!(first.max_update_row_id, None);

        let second = alloc.reserve_id_range(&table, 3).unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.min_row_id, Some(1003));
        assert_eq!(second.max_row_id, Some(1005));
        assert_eq!(second.max_update_row_id, Some(1002));
    }

    #[test]
    fn empty_reservation_still_consumes_a_version() {
        let alloc = allocator(1);
        let table = TableId::new();

        let range = alloc.reserve_id_range(&table, 0).unwrap();
        assert!(range.is_empty());
        assert_eq!(range.version, 1);
        assert_eq!(alloc.reserve_id_range(&table, 1).unwrap().version, 2);
    }

    #[test]
    fn tables_have_independent_counters() {
        let alloc = allocator(1);
        let a = TableId::new();
        let b = TableId::new();

        alloc.reserve_id_range(&a, 10).unwrap();
        let range = alloc.reserve_id_range(&b, 1).unwrap();
        assert_eq!(range.min_row_id, Some(1));
        assert_eq!(range.version, 1);
    }

    #[test]
    fn concurrent_reservations_never_overlap() {
        let alloc = allocator(1);
        let table = TableId::new();

        let ranges: Vec<IdRange> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let alloc = &alloc;
                    let table = &table;
                    s.spawn(move || {
                        (0..50)
                            .map(|_| alloc.reserve_id_range(table, if i % 2 == 0 { 5 } else { 3 }).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let versions: HashSet<_> = ranges.iter().map(|r| r.version).collect();
        assert_eq!(versions.len(), ranges.len());

        let mut ids = HashSet::new();
        for range in &ranges {
            for id in range.row_ids() {
                assert!(ids.insert(id), "row id {id} handed out twice");
            }
        }
        assert_eq!(ids.len(), 4 * 50 * 5 + 4 * 50 * 3);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let alloc = allocator(1);
        let table = TableId::new();
        alloc.reserve_id_range(&table, 10).unwrap();

        let state = alloc.advance_to(&table, 5, 1).unwrap();
        assert_eq!(state.next_row_id, 11);
        assert_eq!(state.next_version, 2);

        let state = alloc.advance_to(&table, 100, 7).unwrap();
        assert_eq!(state.next_row_id, 100);
        assert_eq!(state.last_row_id, Some(99));
        assert_eq!(alloc.reserve_id_range(&table, 1).unwrap().version, 7);
    }

    #[test]
    fn exhausted_row_id_space_is_rejected() {
        let alloc = allocator(u64::MAX - 1);
        let table = TableId::new();
        assert!(alloc.reserve_id_range(&table, 5).is_err());
        // The failed attempt left the counters untouched.
        assert_eq!(alloc.reserve_id_range(&table, 1).unwrap().min_row_id, Some(u64::MAX - 1));
    }
}
