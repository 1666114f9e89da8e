//! Document store abstraction
//!
//! Components above the database layer never see SQL. They talk to a
//! key-indexed document store through [`DocumentStore`]: collections of JSON
//! objects addressed by `_id`, queried with a small [`Filter`] language.

mod filter;
mod sqlite;

pub use filter::Filter;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// A stored document: a JSON object that always carries a string `_id`
pub type Document = Map<String, Value>;

/// Field holding the document identifier
pub const ID_FIELD: &str = "_id";

/// Options for [`DocumentStore::create_index`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Reject two documents with the same value for the indexed field
    pub unique: bool,
    /// Index name, unique per collection; defaults to the field name
    pub name: Option<String>,
}

impl IndexOptions {
    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            unique: true,
            name: Some(name.into()),
        }
    }
}

/// Acknowledgement returned by update operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upserted_id: Option<String>,
}

/// Description of an existing collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub document_count: u64,
    pub indexes: Vec<String>,
}

/// Collection-level CRUD over JSON documents
///
/// Writes with `set` merge the given top-level fields into the matched
/// documents; `_id` is never rewritten.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// First document matching `filter`, in insertion order
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    /// Every document matching `filter`, in insertion order
    async fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Insert a new document, generating `_id` when absent; returns the id
    async fn insert_one(&self, collection: &str, document: Value) -> Result<String>;

    /// Merge `set` into the first matching document, optionally inserting one
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        set: Value,
        upsert: bool,
    ) -> Result<UpdateResult>;

    /// Merge `set` into every matching document
    async fn update_many(&self, collection: &str, filter: &Filter, set: Value)
        -> Result<UpdateResult>;

    /// Create (or keep) a secondary index on a top-level field; returns its name
    async fn create_index(
        &self,
        collection: &str,
        field: &str,
        options: IndexOptions,
    ) -> Result<String>;

    /// Administrative index removal; `"*"` drops every index on the collection
    async fn drop_indexes(&self, collection: &str, index: &str) -> Result<usize>;

    /// All collections that have been written to or indexed
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_options() {
        let options = IndexOptions::default();
        assert!(!options.unique);
        assert_eq!(options.name, None);

        let options = IndexOptions::unique("users_slug");
        assert!(options.unique);
        assert_eq!(options.name.as_deref(), Some("users_slug"));
    }
}
