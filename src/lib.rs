#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! zcms - content-management backend core
//!
//! Brings a zcms instance from process start to "serving requests": connects
//! the document store, either performs first-run setup or applies pending
//! schema migrations, optionally rotates the token signing secret and starts
//! the HTTP API.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `cli` | The `zcms` binary (default) | `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`readiness`]**: named signals that independently started components
//!   publish and wait on
//! - **[`database`]**: SQLite-backed document store, `metas` repository
//! - **[`migration`]**: versioned schema steps tracked by the `db_version` marker
//! - **[`bootstrap`]**: boot path selection, first-run installer, [`Sequencer`]
//! - **[`auth`]**: password hashing, signing secret, session tokens
//! - **[`server`]**: axum HTTP API
//! - **[`config`]**: Configuration management
//!
//! Startup is a small graph of producers, each waiting only on the signals it
//! needs:
//!
//! ```text
//! storage-ready ──> migration-done ──┬──> full-init-done ──┐  (first run)
//!                                    │                     v
//!                                    └─────────────> web-ready ──> started
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use zcms::{launch, StartupOptions, ZcmsConfig};
//!
//! let config = ZcmsConfig::new(&None)?;
//! let report = launch(&config, StartupOptions::default())?.run().await?;
//! println!("serving on {} (schema {:?})", report.address, report.schema);
//! ```
//!
//! ## Custom Migrations
//!
//! ```rust,ignore
//! use zcms::migration::standard_migrations;
//!
//! let mut migrator = standard_migrations();
//! migrator.define_fn("0.0.3", |ctx| async move {
//!     ctx.store.update_many("posts", &Filter::All, json!({"draft": false})).await?;
//!     Ok(())
//! })?;
//! ```

pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod database;
pub mod migration;
pub mod readiness;
pub mod server;

// =============================================================================
// Configuration
// =============================================================================

pub use config::ZcmsConfig;

// =============================================================================
// Startup
// =============================================================================

pub use app::launch;
pub use bootstrap::{
    AdminAccount, BootPath, InstallOutcome, Installer, Sequencer, StartupOptions, StartupReport,
};
pub use readiness::{Readiness, ReadinessError, Signal};

// =============================================================================
// Migrations
// =============================================================================

pub use migration::{
    describe, standard_migrations, MigrationContext, MigrationError, MigrationReport,
    MigrationStep, Migrator, SchemaVersion, VersionMarker, VersionParseError,
};

// =============================================================================
// Database
// =============================================================================

pub use database::{
    DatabaseConn, Document, DocumentStore, Filter, IndexOptions, MetaRepository, SqliteStore,
    StorageHandle, UpdateResult,
};

// =============================================================================
// HTTP API
// =============================================================================

pub use server::{create_router, register_web, ApiError, AppState, ServerConfig};
