// Engine Configuration
//
// Hard limits mirrored from the physical storage engine plus the
// allocator and paging knobs. Loadable from JSON; every field
// falls back to its built-in default.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Column ceiling of the downstream engine. A schema must stay strictly below it.
pub const DEFAULT_MAX_COLUMNS_PER_TABLE: usize = 4095;

/// Row width ceiling of the downstream engine.
pub const DEFAULT_MAX_BYTES_PER_ROW: u64 = 64000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_columns_per_table: usize,
    pub max_bytes_per_row: u64,
    pub first_row_id: u64,
    pub first_version: u64,
    pub max_page_size: u64,
    pub default_string_max_size: u64,
    pub max_column_name_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_columns_per_table: DEFAULT_MAX_COLUMNS_PER_TABLE,
            max_bytes_per_row: DEFAULT_MAX_BYTES_PER_ROW,
            first_row_id: 1,
            first_version: 1,
            max_page_size: 100,
            default_string_max_size: 50,
            max_column_name_length: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "first_row_id": 1001 }"#).unwrap();

        assert_eq!(config.first_row_id, 1001);
        assert_eq!(config.max_columns_per_table, 4095);
        assert_eq!(config.max_bytes_per_row, 64000);
        assert_eq!(config.first_version, 1);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(EngineConfig::from_json("{ first_row_id: ").is_err());
    }
}
