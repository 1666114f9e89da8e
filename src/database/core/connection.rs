//! Database connection management
//!
//! This module provides the SQLite connection wrapper that backs the document store.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::Path;

/// Core database connection wrapper
///
/// `DatabaseConn` wraps a single SQLite connection, handling both file-based
/// and in-memory databases with consistent pragmas and error messages.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created. Missing parent
    /// directories of a file path are created first.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => {
                if let Some(parent) = Path::new(p).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            anyhow!("Failed to create database directory for '{}': {}", p, e)
                        })?;
                    }
                }
                Connection::open(p)
                    .map_err(|e| anyhow!("Failed to open database at '{}': {}", p, e))?
            }
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Open a database file at the given path
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    fn configure(&self) -> Result<()> {
        // WAL keeps readers unblocked while a migration step writes
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;

        self.conn
            .execute("PRAGMA synchronous=NORMAL", [])
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .execute("PRAGMA temp_store=MEMORY", [])
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        Ok(())
    }

    /// Begin an unchecked transaction
    ///
    /// Used when several document writes must land atomically.
    pub fn transaction(&self) -> Result<rusqlite::Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .map_err(|e| anyhow!("Failed to begin transaction: {}", e))
    }
}
