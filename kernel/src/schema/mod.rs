// Schema Binding
//
// The ordered list of column ids a table currently owns, and the
// pure computation that derives a new list from a batch of column
// changes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::column::{ColumnDefinition, ColumnId};
use crate::error::{Error, Result};
use crate::log::TableId;

pub mod binder;
pub mod store;

pub use binder::{BoundObjectsPage, SchemaBinder};
pub use store::{BindingStore, InMemoryBindingStore};

/// Revision stamp of a schema binding. Replaced on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Etag(pub Uuid);

impl Etag {
    pub fn new() -> Self {
        Etag(Uuid::new_v4())
    }

    /// Stamp of a table that has never been bound.
    pub fn unbound() -> Self {
        Etag(Uuid::nil())
    }
}

impl Default for Etag {
    fn default() -> Self {
        Etag::unbound()
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaBinding {
    pub object_id: TableId,
    pub column_ids: Vec<ColumnId>,
    pub etag: Etag,
}

impl SchemaBinding {
    pub fn empty(object_id: TableId) -> Self {
        Self {
            object_id,
            column_ids: Vec::new(),
            etag: Etag::unbound(),
        }
    }

    pub fn contains(&self, id: &ColumnId) -> bool {
        self.column_ids.contains(id)
    }
}

/// One add, remove or replace instruction.
///
/// Both ids set replaces `old` in place, only `old` removes it,
/// only `new` appends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    #[serde(default)]
    pub old_column_id: Option<ColumnId>,
    #[serde(default)]
    pub new_column_id: Option<ColumnId>,
}

impl ColumnChange {
    pub fn add(id: ColumnId) -> Self {
        Self {
            old_column_id: None,
            new_column_id: Some(id),
        }
    }

    pub fn remove(id: ColumnId) -> Self {
        Self {
            old_column_id: Some(id),
            new_column_id: None,
        }
    }

    pub fn update(old: ColumnId, new: ColumnId) -> Self {
        Self {
            old_column_id: Some(old),
            new_column_id: Some(new),
        }
    }
}

/// Old and new definitions behind one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChangeDetails {
    pub old: Option<ColumnDefinition>,
    pub new: Option<ColumnDefinition>,
}

/// Apply `changes`, in order, to `current`.
///
/// Removing an id that is not present is a no-op. Updating an id that is
/// not present fails.
pub fn compute_new_schema(current: &[ColumnId], changes: &[ColumnChange]) -> Result<Vec<ColumnId>> {
    let mut ids = current.to_vec();
    for change in changes {
        match (&change.old_column_id, &change.new_column_id) {
            (Some(old), Some(new)) => {
                let index = ids.iter().position(|id| id == old).ok_or_else(|| {
                    Error::invalid(format!(
                        "cannot update column {old} since it is not currently a column of the table"
                    ))
                })?;
                ids.insert(index, new.clone());
                if let Some(pos) = ids.iter().position(|id| id == old) {
                    ids.remove(pos);
                }
            }
            (Some(old), None) => {
                if let Some(pos) = ids.iter().position(|id| id == old) {
                    ids.remove(pos);
                }
            }
            (None, Some(new)) => ids.push(new.clone()),
            (None, None) => {
                return Err(Error::invalid(
                    "a column change must name an old column, a new column, or both",
                ))
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ColumnId {
        ColumnId::from(s)
    }

    #[test]
    fn update_preserves_position() {
        let result = compute_new_schema(&[id("a"), id("c")], &[ColumnChange::update(id("a"), id("b"))]).unwrap();
        assert_eq!(result, vec![id("b"), id("c")]);

        let result = compute_new_schema(
            &[id("a"), id("b"), id("c")],
            &[ColumnChange::update(id("c"), id("z"))],
        )
        .unwrap();
        assert_eq!(result, vec![id("a"), id("b"), id("z")]);
    }

    #[test]
    fn add_then_remove_restores_the_original() {
        let start = vec![id("a"), id("b")];
        let added = compute_new_schema(&start, &[ColumnChange::add(id("x"))]).unwrap();
        assert_eq!(added, vec![id("a"), id("b"), id("x")]);

        let removed = compute_new_schema(&added, &[ColumnChange::remove(id("x"))]).unwrap();
        assert_eq!(removed, start);
    }

    #[test]
    fn removal_is_idempotent() {
        let start = vec![id("a"), id("b"), id("c")];
        let once = compute_new_schema(&start, &[ColumnChange::remove(id("b"))]).unwrap();
        let twice = compute_new_schema(
            &start,
            &[ColumnChange::remove(id("b")), ColumnChange::remove(id("b"))],
        )
        .unwrap();
        assert_eq!(once, twice);

        let absent = compute_new_schema(&start, &[ColumnChange::remove(id("q"))]).unwrap();
        assert_eq!(absent, start);
    }

    #[test]
    fn updating_an_unbound_column_fails() {
        let err = compute_new_schema(&[id("a")], &[ColumnChange::update(id("q"), id("b"))]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn changes_apply_in_caller_order() {
        let result = compute_new_schema(
            &[id("a")],
            &[
                ColumnChange::add(id("b")),
                ColumnChange::update(id("b"), id("c")),
                ColumnChange::remove(id("a")),
            ],
        )
        .unwrap();
        assert_eq!(result, vec![id("c")]);
    }

    #[test]
    fn empty_change_is_rejected() {
        let change = ColumnChange {
            old_column_id: None,
            new_column_id: None,
        };
        assert!(compute_new_schema(&[], &[change]).is_err());
    }
}
