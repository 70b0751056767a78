// Engine Errors
//
// A single tagged error type shared by every component. Callers
// branch on `Error::kind()` rather than on message text.

use std::fmt;

use crate::schema::Etag;

/// Which capacity ceiling a schema exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    /// Number of columns bound to one table.
    ColumnCount,

    /// Sum of the worst-case byte widths of every column.
    RowBytes,
}

impl fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeLimit::ColumnCount => write!(f, "column count"),
            SizeLimit::RowBytes => write!(f, "row size in bytes"),
        }
    }
}

/// Plain discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Unauthorized,
    SchemaTooLarge,
    ConflictingUpdate,
    Datastore,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("schema too large: {limit} is {actual}, the maximum is {max}")]
    SchemaTooLarge {
        limit: SizeLimit,
        actual: u64,
        max: u64,
    },

    #[error("conflicting update on {object_id}: expected etag {expected}, current etag is {actual}")]
    ConflictingUpdate {
        object_id: String,
        expected: Etag,
        actual: Etag,
    },

    #[error("datastore failure: {0}")]
    Datastore(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::SchemaTooLarge { .. } => ErrorKind::SchemaTooLarge,
            Error::ConflictingUpdate { .. } => ErrorKind::ConflictingUpdate,
            Error::Datastore(_) => ErrorKind::Datastore,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Datastore(format!("serialization: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_too_large_message_carries_the_computed_value() {
        let err = Error::SchemaTooLarge {
            limit: SizeLimit::RowBytes,
            actual: 64004,
            max: 64000,
        };

        assert_eq!(err.kind(), ErrorKind::SchemaTooLarge);
        let msg = err.to_string();
        assert!(msg.contains("64004"), "unexpected message: {msg}");
        assert!(msg.contains("row size in bytes"));
    }

    #[test]
    fn serde_failures_are_datastore_errors() {
        let err: Error = serde_json::from_str::<u64>("not json").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Datastore);
    }
}
