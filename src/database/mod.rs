//! Database module
//!
//! All persistence for zcms, organized into:
//!
//! - **core**: SQLite connection wrapper and storage layout management
//! - **store**: the [`DocumentStore`] abstraction and its SQLite implementation
//! - **collections**: well-known collection names and the `metas` repository
//! - **handle**: [`StorageHandle`], the value published once storage is connected
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── schema      # documents / indexes / collections tables
//! │
//! ├── store/          # Document model
//! │   ├── filter      # Filter predicates over JSON documents
//! │   └── sqlite      # SqliteStore
//! │
//! ├── collections     # metas/users/posts/tags, MetaRepository
//! └── handle          # StorageHandle (store + fresh flag)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use zcms::database::{DocumentStore, Filter, SqliteStore};
//!
//! let store = SqliteStore::open("/var/lib/zcms/zcms.sqlite3")?;
//! let admin = store.find_one("users", &Filter::eq("slug", "admin")).await?;
//! ```

pub mod collections;
pub mod core;
mod handle;
pub mod store;

pub use self::core::{DatabaseConn, SchemaDefinitions, SchemaManager, SchemaStatus, STORAGE_LAYOUT_VERSION};

pub use collections::{MetaRepository, META_DB_VERSION, META_JWT_SECRET};
pub use handle::StorageHandle;
pub use store::{
    CollectionInfo, Document, DocumentStore, Filter, IndexOptions, SqliteStore, UpdateResult,
};
