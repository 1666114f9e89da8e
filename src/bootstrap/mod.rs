//! Startup sequencing
//!
//! Decides between the first-run path and the upgrade path, waits for the
//! matching readiness signal, applies the optional secret rotation and finally
//! waits for the web server.

mod install;

pub use install::{AdminAccount, InstallOutcome, Installer, ADMIN_SLUG};

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::auth::SecretStore;
use crate::database::StorageHandle;
use crate::migration::{describe, SchemaVersion, VersionMarker};
use crate::readiness::{Readiness, ReadinessError, Signal};

/// Which initialization branch this start takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootPath {
    /// No version marker, or `--init` was given
    FullInit,
    /// Existing database; run pending migrations
    Migrate,
}

impl BootPath {
    pub fn detect(fresh: bool, force_init: bool) -> Self {
        if fresh || force_init {
            BootPath::FullInit
        } else {
            BootPath::Migrate
        }
    }

    /// Signal that marks the schema as usable on this path
    pub fn signal(&self) -> Signal {
        match self {
            BootPath::FullInit => Signal::FullInitDone,
            BootPath::Migrate => Signal::MigrationDone,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Run first-run initialization even when a version marker exists
    pub force_init: bool,
    /// Replace the token signing secret before the server is reported ready
    pub revoke_jwt_secret: bool,
    /// Bound on every readiness wait; `None` waits indefinitely
    pub signal_timeout: Option<Duration>,
}

/// Summary of a completed startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub path: BootPath,
    pub schema: Option<SchemaVersion>,
    pub secret_rotated: bool,
    pub address: SocketAddr,
}

/// Top-level startup flow
pub struct Sequencer {
    readiness: Readiness,
    options: StartupOptions,
}

impl Sequencer {
    pub fn new(readiness: Readiness, options: StartupOptions) -> Self {
        Self { readiness, options }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    async fn wait_for<T: Any + Send + Sync>(&self, signal: Signal) -> Result<Arc<T>, ReadinessError> {
        match self.options.signal_timeout {
            Some(timeout) => self.readiness.wait_for_timeout::<T>(signal, timeout).await,
            None => self.readiness.wait_for::<T>(signal).await,
        }
    }

    async fn wait(&self, signal: Signal) -> Result<(), ReadinessError> {
        match self.options.signal_timeout {
            Some(timeout) => self.readiness.wait_timeout(signal, timeout).await,
            None => self.readiness.wait(signal).await,
        }
    }

    /// Drive startup to completion
    ///
    /// Only the signal belonging to the detected path is awaited before the
    /// schema is reported, so a fresh database never depends on the migration
    /// signal here.
    pub async fn run(&self) -> Result<StartupReport> {
        let storage = self.wait_for::<StorageHandle>(Signal::StorageReady).await?;
        let path = BootPath::detect(storage.is_fresh(), self.options.force_init);
        info!("Boot path: {:?}, waiting for {}", path, path.signal());

        self.wait(path.signal()).await?;

        let schema = VersionMarker::new(storage.store()).read().await?;
        info!("Database initialized. Schema version: {}", describe(schema));

        if self.options.revoke_jwt_secret {
            info!("Revoking token signing secret");
            SecretStore::new(storage.store()).rotate().await?;
        }

        let address = self.wait_for::<SocketAddr>(Signal::WebReady).await?;
        Ok(StartupReport {
            path,
            schema,
            secret_rotated: self.options.revoke_jwt_secret,
            address: *address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DocumentStore, MetaRepository, SqliteStore, META_DB_VERSION};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3000))
    }

    async fn storage(marker: Option<&str>) -> StorageHandle {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        if let Some(marker) = marker {
            MetaRepository::new(store.clone())
                .set_value(META_DB_VERSION, marker)
                .await
                .unwrap();
        }
        StorageHandle::from_store(store, ":memory:".into()).await.unwrap()
    }

    #[test]
    fn test_detect_path() {
        assert_eq!(BootPath::detect(true, false), BootPath::FullInit);
        assert_eq!(BootPath::detect(false, true), BootPath::FullInit);
        assert_eq!(BootPath::detect(true, true), BootPath::FullInit);
        assert_eq!(BootPath::detect(false, false), BootPath::Migrate);
        assert_eq!(BootPath::FullInit.signal(), Signal::FullInitDone);
        assert_eq!(BootPath::Migrate.signal(), Signal::MigrationDone);
    }

    #[tokio::test]
    async fn test_fresh_database_waits_on_full_init_only() {
        let handle = storage(None).await;
        let store = handle.store();
        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        readiness
            .register(Signal::FullInitDone, move |_| async move {
                MetaRepository::new(store)
                    .set_value(META_DB_VERSION, "0.0.2")
                    .await?;
                Ok(())
            })
            .unwrap();
        readiness
            .register(Signal::WebReady, |_| async { Ok(addr()) })
            .unwrap();

        // Nothing ever registers the migration signal
        let report = Sequencer::new(readiness.clone(), StartupOptions::default())
            .run()
            .await
            .unwrap();

        assert_eq!(report.path, BootPath::FullInit);
        assert_eq!(report.schema, Some(SchemaVersion::new(0, 0, 2)));
        assert_eq!(report.address, addr());
        assert!(!readiness.is_registered(Signal::MigrationDone));
    }

    #[tokio::test]
    async fn test_existing_database_waits_on_migration() {
        let handle = storage(Some("0.0.1")).await;
        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        readiness
            .register(Signal::MigrationDone, |_| async { Ok(()) })
            .unwrap();
        readiness
            .register(Signal::WebReady, |_| async { Ok(addr()) })
            .unwrap();

        let report = Sequencer::new(readiness, StartupOptions::default())
            .run()
            .await
            .unwrap();
        assert_eq!(report.path, BootPath::Migrate);
        assert_eq!(report.schema, Some(SchemaVersion::new(0, 0, 1)));
        assert!(!report.secret_rotated);
    }

    #[tokio::test]
    async fn test_secret_rotation_on_request() {
        let handle = storage(Some("0.0.2")).await;
        let secrets = SecretStore::new(handle.store());
        let before = secrets.ensure().await.unwrap();

        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        readiness
            .register(Signal::MigrationDone, |_| async { Ok(()) })
            .unwrap();
        readiness
            .register(Signal::WebReady, |_| async { Ok(addr()) })
            .unwrap();

        let options = StartupOptions {
            revoke_jwt_secret: true,
            ..Default::default()
        };
        let report = Sequencer::new(readiness, options).run().await.unwrap();

        assert!(report.secret_rotated);
        let after = secrets.current().await.unwrap().unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_failed_migration_aborts_startup() {
        let handle = storage(Some("0.0.0")).await;
        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        readiness
            .register(Signal::MigrationDone, |_| async {
                Err::<(), _>(anyhow::anyhow!("step #1 failed"))
            })
            .unwrap();

        let err = Sequencer::new(readiness, StartupOptions::default())
            .run()
            .await
            .unwrap_err();
        let err = err.downcast_ref::<ReadinessError>().unwrap();
        assert_eq!(err.signal(), Signal::MigrationDone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_web_producer_times_out_when_bounded() {
        let handle = storage(Some("0.0.2")).await;
        let readiness = Readiness::new();
        readiness
            .register(Signal::StorageReady, move |_| async move { Ok(handle) })
            .unwrap();
        readiness
            .register(Signal::MigrationDone, |_| async { Ok(()) })
            .unwrap();

        let options = StartupOptions {
            signal_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let err = Sequencer::new(readiness, options).run().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReadinessError>(),
            Some(ReadinessError::Timeout {
                signal: Signal::WebReady,
                ..
            })
        ));
    }
}
