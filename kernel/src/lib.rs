// Tabula Kernel
//
// Row-truth storage and column-schema management for versioned
// tables.

pub mod adapters;
pub mod alloc;
pub mod backup;
pub mod column;
pub mod config;
pub mod engine;
pub mod error;
pub mod invariants;
pub mod log;
pub mod replay;
pub mod schema;

pub use config::EngineConfig;
pub use engine::{Collaborators, TableEngine};
pub use error::{Error, ErrorKind, Result};
