// Column Definition Registry
//
// Creates, looks up and pages through column definitions.
// Creation is idempotent by content.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{ColumnDefinition, ColumnId, ColumnStore, NewColumn};
use crate::adapters::auth::{Authorizer, CallerContext};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// One page of a column listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPage {
    pub results: Vec<ColumnDefinition>,
    pub total_count: u64,
}

pub struct ColumnRegistry {
    store: Arc<dyn ColumnStore>,
    authorizer: Arc<dyn Authorizer>,
    config: Arc<EngineConfig>,
}

impl ColumnRegistry {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        authorizer: Arc<dyn Authorizer>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            authorizer,
            config,
        }
    }

    fn require_login(&self, caller: &CallerContext) -> Result<()> {
        if self.authorizer.is_anonymous(caller) {
            return Err(Error::unauthorized("you must login to create a column"));
        }
        Ok(())
    }

    /// Create a column, or return the existing one with identical content.
    #[instrument(name = "column::create", level = "debug", skip(self, caller, column), fields(name = %column.name))]
    pub fn create(&self, caller: &CallerContext, column: &NewColumn) -> Result<ColumnDefinition> {
        self.require_login(caller)?;
        let definition = ColumnDefinition::from_new(column, &self.config)?;
        let inserted = self.store.insert_if_absent(&definition)?;
        debug!(id = %definition.id, inserted, "column definition resolved");
        Ok(definition)
    }

    /// Create several columns. Every definition is validated before anything is written.
    #[instrument(name = "column::create_many", level = "debug", skip_all, fields(count = columns.len()))]
    pub fn create_many(
        &self,
        caller: &CallerContext,
        columns: &[NewColumn],
    ) -> Result<Vec<ColumnDefinition>> {
        self.require_login(caller)?;
        let definitions = columns
            .iter()
            .map(|c| ColumnDefinition::from_new(c, &self.config))
            .collect::<Result<Vec<_>>>()?;
        for definition in &definitions {
            self.store.insert_if_absent(definition)?;
        }
        Ok(definitions)
    }

    pub fn get(&self, id: &ColumnId) -> Result<ColumnDefinition> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::not_found(format!("column {id} does not exist")))
    }

    /// Fetch several definitions.
    ///
    /// With `keep_order` the result follows `ids` one-for-one; otherwise it is
    /// sorted by id with duplicates collapsed. Any unknown id fails the call.
    pub fn get_many(&self, ids: &[ColumnId], keep_order: bool) -> Result<Vec<ColumnDefinition>> {
        let unique: BTreeSet<&ColumnId> = ids.iter().collect();
        let mut by_id: HashMap<&ColumnId, ColumnDefinition> = HashMap::with_capacity(unique.len());
        for id in unique.iter().copied() {
            by_id.insert(id, self.get(id)?);
        }

        if keep_order {
            ids.iter()
                .map(|id| {
                    by_id
                        .get(id)
                        .cloned()
                        .ok_or_else(|| Error::not_found(format!("column {id} does not exist")))
                })
                .collect()
        } else {
            Ok(unique
                .into_iter()
                .filter_map(|id| by_id.remove(id))
                .collect())
        }
    }

    pub fn list(&self, name_prefix: Option<&str>, limit: u64, offset: u64) -> Result<ColumnPage> {
        validate_limit(limit, self.config.max_page_size)?;
        let results = self.store.list(name_prefix, limit, offset)?;
        let total_count = self.store.count(name_prefix)?;
        Ok(ColumnPage {
            results,
            total_count,
        })
    }

    pub(crate) fn truncate(&self) -> Result<()> {
        self.store.truncate()
    }
}

pub(crate) fn validate_limit(limit: u64, max_page_size: u64) -> Result<()> {
    if limit > max_page_size {
        return Err(Error::invalid(format!(
            "limit cannot be greater than {max_page_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::StaticAuthorizer;
    use crate::column::{ColumnType, InMemoryColumnStore};
    use crate::ErrorKind;

    fn registry() -> ColumnRegistry {
        ColumnRegistry::new(
            Arc::new(InMemoryColumnStore::new()),
            Arc::new(StaticAuthorizer::permissive()),
            Arc::new(EngineConfig::default()),
        )
    }

    #[test]
    fn create_is_idempotent_by_content() {
        let registry = registry();
        let caller = CallerContext::user(1);
        let a = registry.create(&caller, &NewColumn::new("a", ColumnType::Integer)).unwrap();
        let b = registry.create(&caller, &NewColumn::new("a", ColumnType::Integer)).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(registry.list(None, 10, 0).unwrap().total_count, 1);
    }

    #[test]
    fn anonymous_callers_cannot_create() {
        let err = registry()
            .create(&CallerContext::anonymous(), &NewColumn::new("a", ColumnType::Integer))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[test]
    fn create_many_writes_nothing_on_a_naming_error() {
        let registry = registry();
        let err = registry
            .create_many(
                &CallerContext::user(1),
                &[
                    NewColumn::new("fine", ColumnType::String),
                    NewColumn::new("ROW_ID", ColumnType::Integer),
                ],
            )
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(registry.list(None, 10, 0).unwrap().total_count, 0);
    }

    #[test]
    fn get_many_keeps_or_sorts_order() {
        let registry = registry();
        let caller = CallerContext::user(1);
        let cols = registry
            .create_many(
                &caller,
                &[
                    NewColumn::new("x", ColumnType::Integer),
                    NewColumn::new("y", ColumnType::Double),
                    NewColumn::new("z", ColumnType::Boolean),
                ],
            )
            .unwrap();
        let ids: Vec<ColumnId> = vec![cols[2].id.clone(), cols[0].id.clone(), cols[2].id.clone()];

        let ordered = registry.get_many(&ids, true).unwrap();
        let ordered_ids: Vec<_> = ordered.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ordered_ids, ids);

        let natural = registry.get_many(&ids, false).unwrap();
        assert_eq!(natural.len(), 2);
        assert!(natural[0].id < natural[1].id);
    }

    #[test]
    fn get_many_fails_on_unknown_id() {
        let err = registry()
            .get_many(&[ColumnId::from("missing")], false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn list_filters_by_prefix_and_pages() {
        let registry = registry();
        let caller = CallerContext::user(1);
        for name in ["beta", "alpha", "alphabet", "gamma"] {
            registry.create(&caller, &NewColumn::new(name, ColumnType::String)).unwrap();
        }

        let page = registry.list(Some("alpha"), 1, 1).unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].name, "alphabet");

        assert!(registry.list(None, 101, 0).is_err());
    }
}
