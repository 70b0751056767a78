// Column Definitions
//
// Immutable, content-addressed column definitions. Two identical
// definitions always resolve to the same id; schemas only ever
// reference ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

pub mod registry;
pub mod store;

pub use registry::{ColumnPage, ColumnRegistry};
pub use store::{ColumnStore, InMemoryColumnStore};

/// Content hash of a normalized column definition (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnId(pub String);

impl ColumnId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(value: &str) -> Self {
        ColumnId(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    FileHandleId,
    EntityId,
    UserId,
    Link,
    LargeText,
}

const MAX_BYTES_PER_CHAR_UTF8: u64 = 4;
const MAX_INTEGER_BYTES_AS_STRING: u64 = 20;
const MAX_DOUBLE_BYTES_AS_STRING: u64 = 23;
const MAX_BOOLEAN_BYTES_AS_STRING: u64 = 5;
const LARGE_TEXT_IN_ROW_BYTES: u64 = 12;

impl ColumnType {
    /// Types whose width depends on `max_size`.
    pub fn is_sized(self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Link)
    }

    /// Worst-case number of bytes one value of this type occupies in a row.
    pub fn max_bytes(self, max_size: Option<u64>) -> u64 {
        match self {
            ColumnType::String | ColumnType::Link => {
                max_size.unwrap_or(0).saturating_mul(MAX_BYTES_PER_CHAR_UTF8)
            }
            ColumnType::LargeText => LARGE_TEXT_IN_ROW_BYTES,
            ColumnType::Integer
            | ColumnType::Date
            | ColumnType::FileHandleId
            | ColumnType::EntityId
            | ColumnType::UserId => MAX_INTEGER_BYTES_AS_STRING,
            ColumnType::Double => MAX_DOUBLE_BYTES_AS_STRING,
            ColumnType::Boolean => MAX_BOOLEAN_BYTES_AS_STRING,
        }
    }

    fn parse(self, value: &str) -> std::result::Result<(), String> {
        let ok = match self {
            ColumnType::String | ColumnType::Link | ColumnType::LargeText => true,
            ColumnType::Integer
            | ColumnType::Date
            | ColumnType::FileHandleId
            | ColumnType::UserId => value.trim().parse::<i64>().is_ok(),
            ColumnType::EntityId => {
                let trimmed = value.trim();
                let digits = trimmed
                    .strip_prefix("syn")
                    .or_else(|| trimmed.strip_prefix("SYN"))
                    .unwrap_or(trimmed);
                digits.parse::<u64>().is_ok()
            }
            ColumnType::Double => value.trim().parse::<f64>().is_ok(),
            ColumnType::Boolean => {
                value.trim().eq_ignore_ascii_case("true") || value.trim().eq_ignore_ascii_case("false")
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("'{value}' is not a valid {self:?}"))
        }
    }
}

/// A column definition as submitted by a caller, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl NewColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            max_size: None,
            default_value: None,
            enum_values: None,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Canonical form used for hashing and storage.
    fn normalized(&self, config: &EngineConfig) -> NewColumn {
        let max_size = if self.column_type.is_sized() {
            Some(self.max_size.unwrap_or(config.default_string_max_size))
        } else {
            None
        };
        NewColumn {
            name: self.name.trim().to_string(),
            column_type: self.column_type,
            max_size,
            default_value: self.default_value.clone(),
            enum_values: self.enum_values.clone(),
        }
    }
}

/// Stored, immutable column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub id: ColumnId,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ColumnDefinition {
    /// Validate, normalize and content-address a submitted definition.
    pub fn from_new(column: &NewColumn, config: &EngineConfig) -> Result<Self> {
        check_column_naming(&column.name, config)?;
        let normalized = column.normalized(config);
        if normalized.max_size == Some(0) {
            return Err(Error::invalid(format!(
                "column '{}' must have a maximum size greater than zero",
                normalized.name
            )));
        }

        let canonical = serde_json::to_vec(&normalized)?;
        let id = ColumnId(hex_string(&Sha256::digest(&canonical)));
        let definition = ColumnDefinition {
            id,
            name: normalized.name,
            column_type: normalized.column_type,
            max_size: normalized.max_size,
            default_value: normalized.default_value,
            enum_values: normalized.enum_values,
        };

        if let Some(values) = &definition.enum_values {
            for value in values {
                definition.check_raw_value(value)?;
            }
        }
        if let Some(default) = &definition.default_value {
            definition.validate_value(Some(default))?;
        }
        Ok(definition)
    }

    pub fn max_bytes(&self) -> u64 {
        self.column_type.max_bytes(self.max_size)
    }

    /// Validate a cell value destined for this column. `None` is always allowed.
    pub fn validate_value(&self, value: Option<&str>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        self.check_raw_value(value)?;
        if let Some(allowed) = &self.enum_values {
            if !allowed.iter().any(|v| v == value) {
                return Err(Error::invalid(format!(
                    "'{value}' is not one of the allowed values of column '{}'",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn check_raw_value(&self, value: &str) -> Result<()> {
        self.column_type
            .parse(value)
            .map_err(|reason| Error::invalid(format!("column '{}': {reason}", self.name)))?;
        if let Some(max) = self.max_size {
            let len = value.chars().count() as u64;
            if len > max {
                return Err(Error::invalid(format!(
                    "value of {len} characters exceeds the maximum size {max} of column '{}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Names of the system columns every table carries implicitly.
pub const RESERVED_COLUMN_NAMES: &[&str] = &["ROW_ID", "ROW_VERSION", "ROW_ETAG", "ROW_BENEFACTOR"];

/// Words the downstream query layer cannot accept as bare identifiers.
pub const SQL_KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "COUNT", "CREATE", "DELETE", "DESC",
    "DISTINCT", "DROP", "ELSE", "END", "ESCAPE", "EXISTS", "FALSE", "FROM", "GROUP", "HAVING", "IN",
    "INSERT", "INTO", "IS", "JOIN", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER",
    "SELECT", "SET", "TABLE", "THEN", "TRUE", "UNION", "UPDATE", "VALUES", "WHEN", "WHERE",
];

pub fn is_reserved_column_name(name: &str) -> bool {
    RESERVED_COLUMN_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name.trim()))
}

pub fn is_sql_keyword(name: &str) -> bool {
    SQL_KEYWORDS
        .iter()
        .any(|keyword| keyword.eq_ignore_ascii_case(name.trim()))
}

pub(crate) fn check_column_naming(name: &str, config: &EngineConfig) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid("column name cannot be empty"));
    }
    if trimmed.chars().count() > config.max_column_name_length {
        return Err(Error::invalid(format!(
            "column name '{trimmed}' exceeds {} characters",
            config.max_column_name_length
        )));
    }
    if is_reserved_column_name(trimmed) {
        return Err(Error::invalid(format!(
            "the column name: {trimmed} is a system reserved column name"
        )));
    }
    if is_sql_keyword(trimmed) {
        return Err(Error::invalid(format!(
            "the name: {trimmed} is a SQL key word and cannot be used as a column name"
        )));
    }
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
