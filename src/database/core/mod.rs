//! Core database infrastructure
//!
//! - `DatabaseConn`: SQLite connection wrapper with configuration
//! - `SchemaManager`: storage layout initialization and checks
//! - `SchemaStatus`: storage layout state enumeration

mod connection;
mod schema;

pub use connection::DatabaseConn;
pub use schema::{SchemaDefinitions, SchemaManager, SchemaStatus, STORAGE_LAYOUT_VERSION};
