use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::{debug, info};

use super::BootPath;
use crate::auth::{hash_password, SecretStore};
use crate::database::collections::{create_content_indexes, USERS};
use crate::database::{DocumentStore, Filter, StorageHandle};
use crate::migration::{describe, MigrationReport, SchemaVersion, VersionMarker};
use crate::readiness::{Readiness, ReadinessError, Signal};

/// Slug of the account created on first run
pub const ADMIN_SLUG: &str = "admin";

/// Credentials of the initial administrator
#[derive(Debug, Clone)]
pub struct AdminAccount {
    pub email: String,
    pub password: String,
}

/// Result published on [`Signal::FullInitDone`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// First-run setup ran
    Installed {
        schema: Option<SchemaVersion>,
        admin_created: bool,
    },
    /// Existing database on the upgrade path; nothing to do
    NotRequired,
}

/// First-run setup of an empty (or forcibly reinitialized) database
#[derive(Debug, Clone)]
pub struct Installer {
    admin: AdminAccount,
}

impl Installer {
    pub fn new(admin: AdminAccount) -> Self {
        Self { admin }
    }

    /// Create indexes, the signing secret and the admin user
    ///
    /// The version marker is only read. Safe to run against a database that
    /// was already installed: existing indexes, secret and admin are kept.
    pub async fn install(&self, store: Arc<dyn DocumentStore>) -> Result<InstallOutcome> {
        info!("Running first-run initialization");

        create_content_indexes(store.as_ref()).await?;
        SecretStore::new(store.clone()).ensure().await?;
        let admin_created = self.ensure_admin(store.as_ref()).await?;

        let schema = VersionMarker::new(store).read().await?;

        info!(
            "Fresh install done (schema {}, admin {})",
            describe(schema),
            if admin_created { "created" } else { "kept" }
        );
        Ok(InstallOutcome::Installed {
            schema,
            admin_created,
        })
    }

    async fn ensure_admin(&self, store: &dyn DocumentStore) -> Result<bool> {
        let existing = store
            .find_one(
                USERS,
                &Filter::Or(vec![
                    Filter::eq("slug", ADMIN_SLUG),
                    Filter::eq("email", self.admin.email.as_str()),
                ]),
            )
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let pass = hash_password(&self.admin.password)
            .map_err(|e| anyhow!("Failed to hash admin password: {}", e))?;
        store
            .insert_one(
                USERS,
                json!({
                    "slug": ADMIN_SLUG,
                    "name": "Administrator",
                    "email": self.admin.email,
                    "pass": pass,
                    "perm": { "admin": true },
                }),
            )
            .await?;
        info!("Created admin user {}", self.admin.email);
        Ok(true)
    }

    /// Register as the producer of [`Signal::FullInitDone`]
    ///
    /// On the first-run path setup starts once [`Signal::MigrationDone`] has
    /// settled, so a forced reinitialization of an outdated database still
    /// applies every pending step. On the upgrade path the signal settles
    /// immediately with [`InstallOutcome::NotRequired`].
    pub fn register(self, readiness: &Readiness, force_init: bool) -> Result<(), ReadinessError> {
        readiness.register(Signal::FullInitDone, move |ready| async move {
            let storage = ready
                .wait_for::<StorageHandle>(Signal::StorageReady)
                .await?;
            match BootPath::detect(storage.is_fresh(), force_init) {
                BootPath::FullInit => {
                    let migrated = ready
                        .wait_for::<MigrationReport>(Signal::MigrationDone)
                        .await?;
                    debug!(
                        "Schema at {} before first-run setup",
                        describe(migrated.current)
                    );
                    self.install(storage.store()).await
                }
                BootPath::Migrate => Ok(InstallOutcome::NotRequired),
            }
        })
    }
}
