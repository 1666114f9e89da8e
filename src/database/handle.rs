use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::collections::{MetaRepository, META_DB_VERSION};
use super::store::{DocumentStore, SqliteStore};

/// Connected storage, as published on the storage-ready signal
///
/// `fresh` is captured at connect time, before any component writes, so every
/// consumer derives the same boot path from it.
#[derive(Clone)]
pub struct StorageHandle {
    store: Arc<dyn DocumentStore>,
    fresh: bool,
    location: String,
}

impl StorageHandle {
    /// Open the SQLite document store at `path` and inspect its version marker
    pub async fn connect(path: &str) -> Result<Self> {
        let store = SqliteStore::open(path)?;
        let location = store.location().to_string();
        let handle = Self::from_store(Arc::new(store), location).await?;
        info!(
            "Storage connected at {} ({})",
            handle.location,
            if handle.fresh { "fresh database" } else { "existing database" }
        );
        Ok(handle)
    }

    /// Wrap an already-open store
    pub async fn from_store(store: Arc<dyn DocumentStore>, location: String) -> Result<Self> {
        let fresh = !MetaRepository::new(store.clone())
            .exists(META_DB_VERSION)
            .await?;
        Ok(Self {
            store,
            fresh,
            location,
        })
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// True when no version marker existed at connect time
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_detects_fresh_then_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zcms.sqlite3");
        let path = path.to_str().unwrap();

        let handle = StorageHandle::connect(path).await.unwrap();
        assert!(handle.is_fresh());
        MetaRepository::new(handle.store())
            .set_value(META_DB_VERSION, "0.0.0")
            .await
            .unwrap();
        // The flag is a snapshot taken at connect time
        assert!(handle.is_fresh());
        drop(handle);

        let handle = StorageHandle::connect(path).await.unwrap();
        assert!(!handle.is_fresh());
        assert_eq!(handle.location(), path);
    }
}
