//! Persistence layer: libSQL-backed storage for features, review state,
//! activities, and user preferences.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
