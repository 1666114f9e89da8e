//! Versioned content schema migrations
//!
//! A [`Migrator`] holds one step per target [`SchemaVersion`]. Running it reads
//! the persisted [`VersionMarker`], walks the steps in ascending version order
//! and, for every step newer than the marker, applies it and then persists the
//! marker as exactly that step's version before looking at the next one.
//!
//! A run that dies between applying a step and writing the marker leaves the
//! marker at the previous value, so the step runs again on the next start.
//! Steps must tolerate being re-applied.
//!
//! ```rust,ignore
//! let mut migrator = Migrator::new();
//! migrator.define_fn("0.0.3", |ctx| async move {
//!     ctx.store.update_many("posts", &Filter::All, json!({"draft": false})).await?;
//!     Ok(())
//! })?;
//! let report = migrator.run(store).await?;
//! ```

mod marker;
mod steps;
mod version;

pub use marker::VersionMarker;
pub use steps::{standard_migrations, RebuildContentIndexes, ResetTagContent, SchemaBaseline};
pub use version::{describe, SchemaVersion, VersionParseError};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::database::{DocumentStore, StorageHandle};
use crate::readiness::{Readiness, ReadinessError, Signal};

// =============================================================================
// Steps
// =============================================================================

/// What a step gets to work with
#[derive(Clone)]
pub struct MigrationContext {
    pub store: Arc<dyn DocumentStore>,
    /// Marker value before this step
    pub from: Option<SchemaVersion>,
    /// Version this step brings the schema to
    pub to: SchemaVersion,
}

/// One schema upgrade unit
#[async_trait]
pub trait MigrationStep: Send + Sync {
    async fn apply(&self, ctx: &MigrationContext) -> anyhow::Result<()>;
}

struct FnStep<F>(F);

#[async_trait]
impl<F, Fut> MigrationStep for FnStep<F>
where
    F: Fn(MigrationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn apply(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        (self.0)(ctx.clone()).await
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum MigrationError {
    /// The stored marker is not a valid version; the database needs an operator
    InvalidMarker { value: String, reason: String },
    /// A step was defined with a malformed version
    InvalidVersion(VersionParseError),
    /// A step failed; the marker still holds `from`
    StepFailed {
        index: usize,
        from: Option<SchemaVersion>,
        to: SchemaVersion,
        cause: anyhow::Error,
    },
    /// Reading or writing the marker failed
    Storage(anyhow::Error),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::InvalidMarker { value, reason } => write!(
                f,
                "stored schema version '{}' is invalid ({}); fix the db_version record and restart",
                value, reason
            ),
            MigrationError::InvalidVersion(e) => write!(f, "cannot define migration: {}", e),
            MigrationError::StepFailed {
                index,
                from,
                to,
                cause,
            } => write!(
                f,
                "migration step #{} ({} -> {}) failed: {:#}",
                index,
                describe(*from),
                to,
                cause
            ),
            MigrationError::Storage(e) => write!(f, "schema version storage error: {:#}", e),
        }
    }
}

impl std::error::Error for MigrationError {}

// =============================================================================
// Report
// =============================================================================

/// Outcome of a completed migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Marker before the run
    pub initial: Option<SchemaVersion>,
    /// Steps applied, in order
    pub applied: Vec<SchemaVersion>,
    /// Steps already covered by the marker
    pub skipped: Vec<SchemaVersion>,
    /// Marker after the run
    pub current: Option<SchemaVersion>,
}

// =============================================================================
// Migrator
// =============================================================================

/// Registry of migration steps keyed by target version
#[derive(Clone, Default)]
pub struct Migrator {
    steps: Vec<(SchemaVersion, Arc<dyn MigrationStep>)>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("versions", &self.versions())
            .finish()
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the step for `version`, replacing any earlier step for it
    pub fn insert(&mut self, version: SchemaVersion, step: impl MigrationStep + 'static) -> &mut Self {
        let step: Arc<dyn MigrationStep> = Arc::new(step);
        match self.steps.iter_mut().find(|(v, _)| *v == version) {
            Some(slot) => slot.1 = step,
            None => self.steps.push((version, step)),
        }
        self
    }

    /// Add the step for a version string such as `"0.0.3"`
    pub fn define(
        &mut self,
        version: &str,
        step: impl MigrationStep + 'static,
    ) -> Result<&mut Self, MigrationError> {
        let version = version.parse().map_err(MigrationError::InvalidVersion)?;
        Ok(self.insert(version, step))
    }

    /// Add an async closure as the step for `version`
    pub fn define_fn<F, Fut>(&mut self, version: &str, step: F) -> Result<&mut Self, MigrationError>
    where
        F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.define(version, FnStep(step))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Registered versions in execution order
    pub fn versions(&self) -> Vec<SchemaVersion> {
        let mut versions: Vec<SchemaVersion> = self.steps.iter().map(|(v, _)| *v).collect();
        versions.sort();
        versions
    }

    /// Highest registered version, the schema a fully migrated database is at
    pub fn latest_version(&self) -> Option<SchemaVersion> {
        self.steps.iter().map(|(v, _)| *v).max()
    }

    /// Apply every step newer than the stored marker, in version order
    pub async fn run(&self, store: Arc<dyn DocumentStore>) -> Result<MigrationReport, MigrationError> {
        let marker = VersionMarker::new(store.clone());
        let initial = marker.read().await?;

        let mut steps = self.steps.clone();
        steps.sort_by_key(|(version, _)| *version);

        info!(
            "Evaluating {} migration step(s) against schema {}",
            steps.len(),
            describe(initial)
        );

        let mut report = MigrationReport {
            initial,
            applied: Vec::new(),
            skipped: Vec::new(),
            current: initial,
        };

        for (index, (target, step)) in steps.into_iter().enumerate() {
            // Earlier iterations may have moved the marker
            let current = marker.read().await?;
            if current >= Some(target) {
                debug!("Schema at {}, skipping step {}", describe(current), target);
                report.skipped.push(target);
                continue;
            }

            info!(
                "Migrating schema from {} to {} (step #{})",
                describe(current),
                target,
                index
            );
            let ctx = MigrationContext {
                store: store.clone(),
                from: current,
                to: target,
            };
            step.apply(&ctx)
                .await
                .map_err(|cause| MigrationError::StepFailed {
                    index,
                    from: current,
                    to: target,
                    cause,
                })?;
            marker.write(target).await?;
            report.applied.push(target);
        }

        report.current = marker.read().await?;
        info!(
            "Migration finished: {} applied, {} skipped, schema now {}",
            report.applied.len(),
            report.skipped.len(),
            describe(report.current)
        );
        Ok(report)
    }

    /// Register this migrator as the producer of [`Signal::MigrationDone`]
    ///
    /// The producer only waits for storage; the first-run installer in turn
    /// waits for this signal, so the marker is written by nothing else.
    pub fn register(self, readiness: &Readiness) -> Result<(), ReadinessError> {
        readiness.register(Signal::MigrationDone, move |ready| async move {
            let storage = ready
                .wait_for::<StorageHandle>(Signal::StorageReady)
                .await?;
            let report = self.run(storage.store()).await?;
            Ok::<_, anyhow::Error>(report)
        })
    }
}
