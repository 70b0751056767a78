// Schema Size Invariants
//
// Invariants are pure capacity rules a candidate schema must
// satisfy before it may be bound. They mirror the hard limits of
// the physical storage engine and are checked before binding,
// never after.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::column::{ColumnDefinition, ColumnId, ColumnRegistry};
use crate::config::EngineConfig;
use crate::error::{Error, Result, SizeLimit};

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail { limit: SizeLimit, actual: u64, max: u64 },
}

/// Trait implemented by all schema invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait SchemaInvariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, schema: &[ColumnDefinition]) -> InvariantResult;
}

/// The column count must stay strictly below `max`.
#[derive(Debug, Clone, Copy)]
pub struct MaxColumnCount {
    pub max: usize,
}

impl MaxColumnCount {
    pub fn check(&self, count: usize) -> InvariantResult {
        if count >= self.max {
            InvariantResult::Fail {
                limit: SizeLimit::ColumnCount,
                actual: count as u64,
                max: self.max as u64,
            }
        } else {
            InvariantResult::Pass
        }
    }
}

impl SchemaInvariant for MaxColumnCount {
    fn name(&self) -> &'static str {
        "max-column-count"
    }

    fn validate(&self, schema: &[ColumnDefinition]) -> InvariantResult {
        self.check(schema.len())
    }
}

/// The summed worst-case width of a row must be at most `max` bytes.
#[derive(Debug, Clone, Copy)]
pub struct MaxRowBytes {
    pub max: u64,
}

impl SchemaInvariant for MaxRowBytes {
    fn name(&self) -> &'static str {
        "max-row-bytes"
    }

    fn validate(&self, schema: &[ColumnDefinition]) -> InvariantResult {
        let size = max_row_size(schema);
        if size > self.max {
            InvariantResult::Fail {
                limit: SizeLimit::RowBytes,
                actual: size,
                max: self.max,
            }
        } else {
            InvariantResult::Pass
        }
    }
}

/// Worst-case number of bytes one row of `schema` occupies.
pub fn max_row_size(schema: &[ColumnDefinition]) -> u64 {
    schema
        .iter()
        .fold(0u64, |acc, column| acc.saturating_add(column.max_bytes()))
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn SchemaInvariant>>,
}

impl InvariantEngine {
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine holding the column-count and row-width ceilings from `config`.
    pub fn with_limits(config: &EngineConfig) -> Self {
        let mut engine = Self::new();
        engine.register(MaxColumnCount {
            max: config.max_columns_per_table,
        });
        engine.register(MaxRowBytes {
            max: config.max_bytes_per_row,
        });
        engine
    }

    pub fn register<I: SchemaInvariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, schema: &[ColumnDefinition]) -> Result<()> {
        for invariant in &self.invariants {
            match invariant.validate(schema) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail { limit, actual, max } => {
                    debug!(invariant = invariant.name(), actual, max, "schema invariant failed");
                    return Err(Error::SchemaTooLarge { limit, actual, max });
                }
            }
        }
        Ok(())
    }
}

/// Checks a candidate schema against the size invariants.
pub struct SchemaSizeValidator {
    columns: Arc<ColumnRegistry>,
    count: MaxColumnCount,
    engine: InvariantEngine,
}

impl SchemaSizeValidator {
    pub fn new(columns: Arc<ColumnRegistry>, config: &EngineConfig) -> Self {
        Self {
            columns,
            count: MaxColumnCount {
                max: config.max_columns_per_table,
            },
            engine: InvariantEngine::with_limits(config),
        }
    }

    /// Resolve `column_ids` and check them against every invariant.
    ///
    /// The column count is checked before any lookup. Returns the resolved
    /// definitions in the order given.
    #[instrument(name = "schema::validate_size", level = "trace", skip_all, fields(count = column_ids.len()))]
    pub fn validate(&self, column_ids: &[ColumnId]) -> Result<Vec<ColumnDefinition>> {
        if column_ids.is_empty() {
            return Ok(Vec::new());
        }
        if let InvariantResult::Fail { limit, actual, max } = self.count.check(column_ids.len()) {
            return Err(Error::SchemaTooLarge { limit, actual, max });
        }
        let schema = self.columns.get_many(column_ids, true)?;
        self.engine.evaluate(&schema)?;
        Ok(schema)
    }
}
