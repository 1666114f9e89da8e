//! Storage layout management
//!
//! The document store keeps every collection in one `documents` table. This
//! module owns those tables and the layout version recorded in `zcms_meta`.
//! The layout version is unrelated to the content schema version that the
//! migration engine tracks inside the `metas` collection.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

/// Current storage layout version
/// Increment this when the physical table layout changes
pub const STORAGE_LAYOUT_VERSION: u32 = 1;

/// Table definitions for the document store
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the meta table (tracks the storage layout version)
    pub const META_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS zcms_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    /// SQL for the collection registry
    pub const COLLECTIONS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    /// SQL for the document table; bodies are JSON objects carrying `_id`
    pub const DOCUMENTS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        );
    "#;

    /// SQL for the secondary index registry
    pub const INDEXES_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS document_indexes (
            collection TEXT NOT NULL,
            name TEXT NOT NULL,
            field TEXT NOT NULL,
            is_unique INTEGER NOT NULL,
            sql_name TEXT NOT NULL,
            PRIMARY KEY (collection, name)
        );
    "#;

    const REQUIRED_TABLES: &'static [&'static str] =
        &["zcms_meta", "collections", "documents", "document_indexes"];
}

/// Layout manager for the document store database
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create all tables if they don't exist and record the layout version
    pub fn initialize(&self) -> Result<()> {
        self.conn
            .execute(SchemaDefinitions::META_TABLE, [])
            .map_err(|e| anyhow!("Failed to create meta table: {}", e))?;

        self.set_meta("layout_version", &STORAGE_LAYOUT_VERSION.to_string())?;

        self.conn
            .execute(SchemaDefinitions::COLLECTIONS_TABLE, [])
            .map_err(|e| anyhow!("Failed to create collections table: {}", e))?;

        self.conn
            .execute(SchemaDefinitions::DOCUMENTS_TABLE, [])
            .map_err(|e| anyhow!("Failed to create documents table: {}", e))?;

        self.conn
            .execute(SchemaDefinitions::INDEXES_TABLE, [])
            .map_err(|e| anyhow!("Failed to create document_indexes table: {}", e))?;

        Ok(())
    }

    /// Check the current layout status
    pub fn check_status(&self) -> Result<SchemaStatus> {
        if !self.table_exists("zcms_meta")? {
            return Ok(SchemaStatus::NotInitialized);
        }

        let current_version = self.get_layout_version()?;

        if current_version == STORAGE_LAYOUT_VERSION {
            if self.verify_integrity()? {
                Ok(SchemaStatus::Current)
            } else {
                Ok(SchemaStatus::Corrupted)
            }
        } else {
            Ok(SchemaStatus::Incompatible {
                database_version: current_version,
                required_version: STORAGE_LAYOUT_VERSION,
            })
        }
    }

    fn get_layout_version(&self) -> Result<u32> {
        let version = self.get_meta("layout_version")?.unwrap_or_else(|| "0".to_string());
        version
            .parse()
            .map_err(|e| anyhow!("Invalid storage layout version '{}': {}", version, e))
    }

    fn verify_integrity(&self) -> Result<bool> {
        for table in SchemaDefinitions::REQUIRED_TABLES {
            if !self.table_exists(table)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to inspect sqlite_master: {}", e))?;
        Ok(exists > 0)
    }

    /// Set a metadata value
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO zcms_meta (key, value, updated_at) VALUES (?1, ?2, strftime('%s', 'now'))",
                [key, value],
            )
            .map_err(|e| anyhow!("Failed to set meta value: {}", e))?;
        Ok(())
    }

    /// Get a metadata value
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result: Result<String, _> = self.conn.query_row(
            "SELECT value FROM zcms_meta WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to get meta value: {}", e)),
        }
    }
}

/// Status of the storage layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Database file has no tables yet
    NotInitialized,

    /// Layout is current and valid
    Current,

    /// Database was written by a different layout version
    Incompatible {
        database_version: u32,
        required_version: u32,
    },

    /// Layout is missing required tables
    Corrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_layout_not_initialized() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::NotInitialized
        );
    }

    #[test]
    fn test_layout_initialize_is_repeatable() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        manager.initialize().unwrap();
        manager.initialize().unwrap();

        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Current);
        assert_eq!(manager.get_layout_version().unwrap(), STORAGE_LAYOUT_VERSION);
    }

    #[test]
    fn test_layout_incompatible() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        manager.initialize().unwrap();
        manager.set_meta("layout_version", "99").unwrap();

        assert_eq!(
            manager.check_status().unwrap(),
            SchemaStatus::Incompatible {
                database_version: 99,
                required_version: STORAGE_LAYOUT_VERSION,
            }
        );
    }

    #[test]
    fn test_layout_corrupted() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        manager.initialize().unwrap();
        conn.execute("DROP TABLE document_indexes", []).unwrap();

        assert_eq!(manager.check_status().unwrap(), SchemaStatus::Corrupted);
    }

    #[test]
    fn test_meta_operations() {
        let conn = create_test_db();
        let manager = SchemaManager::new(&conn);

        manager.initialize().unwrap();

        manager.set_meta("test_key", "test_value").unwrap();
        assert_eq!(
            manager.get_meta("test_key").unwrap(),
            Some("test_value".to_string())
        );
        assert_eq!(manager.get_meta("nonexistent").unwrap(), None);
    }
}
