use std::sync::Arc;

use serde_json::Value;

use super::{MigrationError, SchemaVersion};
use crate::database::{DocumentStore, MetaRepository, META_DB_VERSION};

/// Accessor for the persisted content schema version (`metas/db_version`)
///
/// Absent only on a database that was never initialized.
#[derive(Clone)]
pub struct VersionMarker {
    metas: MetaRepository,
}

impl VersionMarker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            metas: MetaRepository::new(store),
        }
    }

    /// Current marker; an unparsable stored value is a configuration error
    pub async fn read(&self) -> Result<Option<SchemaVersion>, MigrationError> {
        let record = self
            .metas
            .get(META_DB_VERSION)
            .await
            .map_err(MigrationError::Storage)?;
        let Some(record) = record else {
            return Ok(None);
        };

        match record.get("value") {
            Some(Value::String(raw)) => {
                raw.parse()
                    .map(Some)
                    .map_err(|e: super::VersionParseError| MigrationError::InvalidMarker {
                        value: raw.clone(),
                        reason: e.reason,
                    })
            }
            other => Err(MigrationError::InvalidMarker {
                value: other.map(|v| v.to_string()).unwrap_or_default(),
                reason: "record has no string value".to_string(),
            }),
        }
    }

    /// Persist `version` exactly
    pub(crate) async fn write(&self, version: SchemaVersion) -> Result<(), MigrationError> {
        self.metas
            .set_value(META_DB_VERSION, &version.to_string())
            .await
            .map_err(MigrationError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::collections::METAS;
    use crate::database::SqliteStore;
    use serde_json::json;

    fn marker() -> (Arc<dyn DocumentStore>, VersionMarker) {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        (store.clone(), VersionMarker::new(store))
    }

    #[tokio::test]
    async fn test_absent_marker() {
        let (_, marker) = marker();
        assert_eq!(marker.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_, marker) = marker();

        marker.write(SchemaVersion::new(0, 0, 10)).await.unwrap();
        assert_eq!(
            marker.read().await.unwrap(),
            Some(SchemaVersion::new(0, 0, 10))
        );
    }

    #[tokio::test]
    async fn test_garbage_marker_is_configuration_error() {
        let (store, marker) = marker();
        store
            .insert_one(METAS, json!({"_id": META_DB_VERSION, "value": "latest"}))
            .await
            .unwrap();

        match marker.read().await {
            Err(MigrationError::InvalidMarker { value, .. }) => assert_eq!(value, "latest"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_string_marker_is_configuration_error() {
        let (store, marker) = marker();
        store
            .insert_one(METAS, json!({"_id": META_DB_VERSION, "value": 2}))
            .await
            .unwrap();

        assert!(matches!(
            marker.read().await,
            Err(MigrationError::InvalidMarker { .. })
        ));
    }
}
