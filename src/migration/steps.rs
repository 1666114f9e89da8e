//! Built-in content schema steps

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{MigrationContext, MigrationStep, Migrator, SchemaVersion};
use crate::database::collections::{create_content_indexes, TAGS};
use crate::database::Filter;

/// Baseline version; nothing to change
pub struct SchemaBaseline;

#[async_trait]
impl MigrationStep for SchemaBaseline {
    async fn apply(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        info!("Nothing to migrate");
        Ok(())
    }
}

/// Give every tag an empty `content` field
pub struct ResetTagContent;

#[async_trait]
impl MigrationStep for ResetTagContent {
    async fn apply(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        let result = ctx
            .store
            .update_many(TAGS, &Filter::All, json!({ "content": "" }))
            .await?;
        info!("Reset content on {} tag(s)", result.matched);
        Ok(())
    }
}

/// Drop every index on every collection, then recreate the unique
/// slug/email indexes
pub struct RebuildContentIndexes;

#[async_trait]
impl MigrationStep for RebuildContentIndexes {
    async fn apply(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        for collection in ctx.store.list_collections().await? {
            info!("Dropping indexes for {}", collection.name);
            ctx.store.drop_indexes(&collection.name, "*").await?;
        }
        create_content_indexes(ctx.store.as_ref()).await
    }
}

/// The migrations every zcms database goes through
pub fn standard_migrations() -> Migrator {
    let mut migrator = Migrator::new();
    migrator
        .insert(SchemaVersion::new(0, 0, 0), SchemaBaseline)
        .insert(SchemaVersion::new(0, 0, 1), ResetTagContent)
        .insert(SchemaVersion::new(0, 0, 2), RebuildContentIndexes);
    migrator
}
