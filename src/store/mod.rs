//! Persistence layer: libSQL-backed storage for message metadata and
//! unsubscribe outcomes.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::StatusStore;
