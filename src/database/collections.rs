//! Well-known collections and the `metas` key/value repository

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::store::{DocumentStore, Filter, IndexOptions};

pub const METAS: &str = "metas";
pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const TAGS: &str = "tags";

/// Meta record holding the content schema version
pub const META_DB_VERSION: &str = "db_version";

/// Meta record holding the token signing secret
pub const META_JWT_SECRET: &str = "jwt_secret";

/// Unique indexes the content collections rely on: (collection, field)
pub const CONTENT_INDEXES: &[(&str, &str)] = &[
    (USERS, "slug"),
    (USERS, "email"),
    (POSTS, "slug"),
    (TAGS, "slug"),
];

/// Create the unique slug/email indexes on the content collections
pub async fn create_content_indexes(store: &dyn DocumentStore) -> Result<()> {
    for (collection, field) in CONTENT_INDEXES {
        store
            .create_index(collection, field, IndexOptions::unique(*field))
            .await?;
    }
    Ok(())
}

/// Repository over single-value records in the `metas` collection
///
/// Each record is `{ "_id": <key>, "value": <string> }`.
#[derive(Clone)]
pub struct MetaRepository {
    store: Arc<dyn DocumentStore>,
}

impl MetaRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Raw record for `key`, if present
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .store
            .find_one(METAS, &Filter::id(key))
            .await?
            .map(Value::Object))
    }

    /// String value for `key`; a record without a string `value` is an error
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(record) => match record.get("value") {
                Some(Value::String(value)) => Ok(Some(value.clone())),
                other => Err(anyhow!(
                    "Meta record '{}' has no string value (found {})",
                    key,
                    other.map(|v| v.to_string()).unwrap_or_else(|| "nothing".into())
                )),
            },
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Insert or overwrite the value for `key`
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .update_one(METAS, &Filter::id(key), json!({ "value": value }), true)
            .await?;
        Ok(())
    }
}
