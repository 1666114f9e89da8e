//! SQLite-backed document store
//!
//! Documents are JSON text rows in a single `documents` table keyed by
//! `(collection, id)`. Secondary indexes are partial expression indexes over
//! `json_extract(body, '$.field')`, so unique constraints are enforced by
//! SQLite itself.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{CollectionInfo, Document, DocumentStore, Filter, IndexOptions, UpdateResult, ID_FIELD};
use crate::database::core::{DatabaseConn, SchemaManager, SchemaStatus};

pub struct SqliteStore {
    db: Mutex<DatabaseConn>,
    location: String,
}

impl SqliteStore {
    /// Open (and lay out, if new) the document database at `path`
    pub fn open(path: &str) -> Result<Self> {
        let db = DatabaseConn::open_path(path)?;
        Self::from_conn(db, path.to_string())
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let db = DatabaseConn::open_in_memory()?;
        Self::from_conn(db, ":memory:".to_string())
    }

    fn from_conn(db: DatabaseConn, location: String) -> Result<Self> {
        let schema = SchemaManager::new(&db.conn);

        match schema.check_status()? {
            SchemaStatus::Current => {
                debug!("Document store layout is current");
            }
            SchemaStatus::NotInitialized => {
                info!("Initializing document store at {}", location);
                schema.initialize()?;
            }
            SchemaStatus::Corrupted => {
                warn!("Document store at {} is missing tables, recreating them", location);
                schema.initialize()?;
            }
            SchemaStatus::Incompatible {
                database_version,
                required_version,
            } => {
                return Err(anyhow!(
                    "Document store at {} uses layout v{}, this build requires v{}",
                    location,
                    database_version,
                    required_version
                ));
            }
        }

        Ok(Self {
            db: Mutex::new(db),
            location,
        })
    }

    /// Where the store lives (`:memory:` for in-memory stores)
    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, DatabaseConn>> {
        self.db
            .lock()
            .map_err(|_| anyhow!("Document store connection lock poisoned"))
    }
}

// =============================================================================
// Row helpers
// =============================================================================

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(anyhow!(
            "Invalid {} name '{}': only ASCII letters, digits and '_' are allowed",
            kind,
            name
        ));
    }
    Ok(())
}

fn into_document(value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Expected a JSON object, got {}", other)),
    }
}

fn parse_body(collection: &str, id: &str, body: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| anyhow!("Corrupt document {}/{}: {}", collection, id, e))?;
    into_document(value)
}

fn load(conn: &Connection, collection: &str, filter: &Filter) -> Result<Vec<(String, Document)>> {
    let rows: Vec<(String, String)> = match filter.pinned_id() {
        Some(id) => conn
            .query_row(
                "SELECT id, body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to read {}: {}", collection, e))?
            .into_iter()
            .collect(),
        None => {
            let mut stmt = conn
                .prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY rowid")
                .map_err(|e| anyhow!("Failed to prepare scan of {}: {}", collection, e))?;
            let rows = stmt
                .query_map([collection], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| anyhow!("Failed to scan {}: {}", collection, e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| anyhow!("Failed to scan {}: {}", collection, e))?
        }
    };

    let mut matched = Vec::new();
    for (id, body) in rows {
        let document = parse_body(collection, &id, &body)?;
        if filter.matches(&document) {
            matched.push((id, document));
        }
    }
    Ok(matched)
}

fn touch_collection(conn: &Connection, collection: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
        [collection],
    )
    .map_err(|e| anyhow!("Failed to register collection {}: {}", collection, e))?;
    Ok(())
}

fn write_error(collection: &str, e: rusqlite::Error) -> anyhow::Error {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            anyhow!("Duplicate key in collection {}: {}", collection, e)
        }
        _ => anyhow!("Failed to write to collection {}: {}", collection, e),
    }
}

fn insert(conn: &Connection, collection: &str, mut document: Document) -> Result<String> {
    let id = match document.get(ID_FIELD) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => return Err(anyhow!("Document _id must be a string, got {}", other)),
        None => {
            let id = uuid::Uuid::new_v4().simple().to_string();
            document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
    };

    touch_collection(conn, collection)?;
    let body = Value::Object(document).to_string();
    conn.execute(
        "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
        params![collection, id, body],
    )
    .map_err(|e| write_error(collection, e))?;
    Ok(id)
}

/// Merge `set` into `document`; returns whether anything changed
fn merge(document: &mut Document, set: &Document) -> bool {
    let mut changed = false;
    for (key, value) in set {
        if key == ID_FIELD {
            continue;
        }
        if document.get(key) != Some(value) {
            document.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn rewrite(conn: &Connection, collection: &str, id: &str, document: &Document) -> Result<()> {
    let body = Value::Object(document.clone()).to_string();
    conn.execute(
        "UPDATE documents SET body = ?3 WHERE collection = ?1 AND id = ?2",
        params![collection, id, body],
    )
    .map_err(|e| write_error(collection, e))?;
    Ok(())
}

// =============================================================================
// DocumentStore implementation
// =============================================================================

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let db = self.lock()?;
        Ok(load(&db.conn, collection, filter)?
            .into_iter()
            .next()
            .map(|(_, document)| document))
    }

    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let db = self.lock()?;
        Ok(load(&db.conn, collection, filter)?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<String> {
        validate_name("collection", collection)?;
        let document = into_document(document)?;
        let db = self.lock()?;
        insert(&db.conn, collection, document)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: Value,
        upsert: bool,
    ) -> Result<UpdateResult> {
        validate_name("collection", collection)?;
        let set = into_document(set)?;
        let db = self.lock()?;

        if let Some((id, mut document)) = load(&db.conn, collection, filter)?.into_iter().next() {
            let modified = merge(&mut document, &set);
            if modified {
                rewrite(&db.conn, collection, &id, &document)?;
            }
            return Ok(UpdateResult {
                matched: 1,
                modified: modified as u64,
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(UpdateResult::default());
        }

        let mut document = Document::new();
        for (field, value) in filter.equalities() {
            document.insert(field.to_string(), value.clone());
        }
        merge(&mut document, &set);
        let id = insert(&db.conn, collection, document)?;
        Ok(UpdateResult {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        set: Value,
    ) -> Result<UpdateResult> {
        validate_name("collection", collection)?;
        let set = into_document(set)?;
        let db = self.lock()?;
        let tx = db.transaction()?;

        let mut result = UpdateResult::default();
        for (id, mut document) in load(&tx, collection, filter)? {
            result.matched += 1;
            if merge(&mut document, &set) {
                rewrite(&tx, collection, &id, &document)?;
                result.modified += 1;
            }
        }

        tx.commit()
            .map_err(|e| anyhow!("Failed to commit update of {}: {}", collection, e))?;
        Ok(result)
    }

    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        options: IndexOptions,
    ) -> Result<String> {
        validate_name("collection", collection)?;
        validate_name("field", field)?;
        let name = options.name.clone().unwrap_or_else(|| field.to_string());
        validate_name("index", &name)?;

        let db = self.lock()?;
        let tx = db.transaction()?;

        let existing: Option<(String, bool)> = tx
            .query_row(
                "SELECT field, is_unique FROM document_indexes WHERE collection = ?1 AND name = ?2",
                params![collection, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| anyhow!("Failed to look up index {}.{}: {}", collection, name, e))?;

        if let Some((existing_field, existing_unique)) = existing {
            if existing_field == field && existing_unique == options.unique {
                return Ok(name);
            }
            return Err(anyhow!(
                "Index {}.{} already exists with a different definition",
                collection,
                name
            ));
        }

        let sql_name = format!("ix_{}_{}", collection, name);
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON documents(json_extract(body, '$.{}')) WHERE collection = '{}'",
            if options.unique { "UNIQUE " } else { "" },
            sql_name,
            field,
            collection
        );
        tx.execute(&sql, [])
            .map_err(|e| anyhow!("Failed to create index {}.{}: {}", collection, name, e))?;
        tx.execute(
            "INSERT INTO document_indexes (collection, name, field, is_unique, sql_name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, name, field, options.unique, sql_name],
        )
        .map_err(|e| anyhow!("Failed to register index {}.{}: {}", collection, name, e))?;
        touch_collection(&tx, collection)?;

        tx.commit()
            .map_err(|e| anyhow!("Failed to commit index {}.{}: {}", collection, name, e))?;
        debug!("Created index {}.{} on field {}", collection, name, field);
        Ok(name)
    }

    async fn drop_indexes(&self, collection: &str, index: &str) -> Result<usize> {
        let db = self.lock()?;
        let tx = db.transaction()?;

        let targets: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT name, sql_name FROM document_indexes WHERE collection = ?1 AND (?2 = '*' OR name = ?2)",
                )
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", collection, e))?;
            let rows = stmt
                .query_map(params![collection, index], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", collection, e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", collection, e))?
        };

        if targets.is_empty() && index != "*" {
            return Err(anyhow!("Index {}.{} not found", collection, index));
        }

        for (name, sql_name) in &targets {
            tx.execute(&format!("DROP INDEX IF EXISTS \"{}\"", sql_name), [])
                .map_err(|e| anyhow!("Failed to drop index {}.{}: {}", collection, name, e))?;
            tx.execute(
                "DELETE FROM document_indexes WHERE collection = ?1 AND name = ?2",
                params![collection, name],
            )
            .map_err(|e| anyhow!("Failed to unregister index {}.{}: {}", collection, name, e))?;
        }

        tx.commit()
            .map_err(|e| anyhow!("Failed to commit index drop on {}: {}", collection, e))?;
        Ok(targets.len())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let db = self.lock()?;
        let conn = &db.conn;

        let names: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM collections ORDER BY name")
                .map_err(|e| anyhow!("Failed to list collections: {}", e))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| anyhow!("Failed to list collections: {}", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| anyhow!("Failed to list collections: {}", e))?
        };

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            let document_count: u64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .map_err(|e| anyhow!("Failed to count {}: {}", name, e))?;

            let mut stmt = conn
                .prepare("SELECT name FROM document_indexes WHERE collection = ?1 ORDER BY name")
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", name, e))?;
            let indexes = stmt
                .query_map([&name], |row| row.get(0))
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", name, e))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(|e| anyhow!("Failed to list indexes of {}: {}", name, e))?;

            collections.push(CollectionInfo {
                name,
                document_count,
                indexes,
            });
        }
        Ok(collections)
    }
}
