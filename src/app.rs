//! Process wiring: registers every startup component on one readiness context

use anyhow::Result;
use tracing::debug;

use crate::bootstrap::{Installer, Sequencer, StartupOptions};
use crate::config::ZcmsConfig;
use crate::database::StorageHandle;
use crate::migration::standard_migrations;
use crate::readiness::{Readiness, Signal};
use crate::server::register_web;

/// Register storage, first-run setup, migrations and the web server, and
/// return the sequencer that drives them to completion
///
/// Every producer starts immediately; each one decides for itself whether the
/// first-run or the upgrade path applies. Must be called within a tokio
/// runtime.
pub fn launch(config: &ZcmsConfig, options: StartupOptions) -> Result<Sequencer> {
    let readiness = Readiness::new();
    let force_init = options.force_init;

    let database_path = config.database_path.clone();
    readiness.register(Signal::StorageReady, move |_| async move {
        StorageHandle::connect(&database_path).await
    })?;

    Installer::new(config.admin_account()).register(&readiness, force_init)?;
    standard_migrations().register(&readiness)?;
    register_web(&readiness, config.server_config(), force_init)?;

    debug!("All startup producers registered");
    Ok(Sequencer::new(readiness, options))
}
