//! Migration orchestrator
//!
//! [`Migrator::run`] drives one complete run:
//!
//! 1. snapshot both registries and compare them
//! 2. stop after the comparison when migration is disabled
//! 3. refuse to continue while ID collisions remain that cleanup would not remove
//! 4. optional destination cleanup, then a fresh destination snapshot
//! 5. optional global IMPORT mode around both passes
//! 6. the first pass, then the retry pass for incompatible versions
//! 7. optional post-migration global mode
//! 8. validation of what is still missing from the destination
//!
//! Nothing is written to the destination before step 3 passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::RegistryClient;
use crate::compare::{compare, Comparison};
use crate::engine::{EngineOptions, MigrationEngine, UnitStatus};
use crate::error::{MigrationError, Result};
use crate::mode::{ModeManager, Phase, Setting, GLOBAL_SCOPE};
use crate::report::{MigrationReport, MissingItem};
use crate::retry::RetryCoordinator;
use crate::schema::Mode;
use crate::snapshot::RegistrySnapshot;

/// Destination subjects to delete before migrating
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cleanup {
    #[default]
    None,
    All,
    Subjects(Vec<String>),
}

impl Cleanup {
    /// Whether cleanup deletes `subject`
    pub fn covers(&self, subject: &str) -> bool {
        match self {
            Cleanup::None => false,
            Cleanup::All => true,
            Cleanup::Subjects(subjects) => subjects.iter().any(|s| s == subject),
        }
    }

    pub fn is_requested(&self) -> bool {
        !matches!(self, Cleanup::None)
    }
}

/// Toggles for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSettings {
    pub enabled: bool,
    pub dry_run: bool,
    pub preserve_ids: bool,
    pub cleanup: Cleanup,
    pub permanent_delete: bool,
    pub auto_compatibility: bool,
    pub global_import_mode: bool,
    pub mode_after_migration: Option<Mode>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            preserve_ids: false,
            cleanup: Cleanup::None,
            permanent_delete: false,
            auto_compatibility: false,
            global_import_mode: false,
            mode_after_migration: None,
        }
    }
}

impl MigrationSettings {
    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            preserve_ids: self.preserve_ids,
            auto_compatibility: self.auto_compatibility,
            dry_run: self.dry_run,
        }
    }
}

/// Migrates `source` into `destination`
pub struct Migrator<'a, S: RegistryClient + ?Sized, D: RegistryClient + ?Sized> {
    source: &'a S,
    destination: &'a D,
    settings: MigrationSettings,
    abort: Arc<AtomicBool>,
}

impl<'a, S: RegistryClient + ?Sized, D: RegistryClient + ?Sized> Migrator<'a, S, D> {
    pub fn new(source: &'a S, destination: &'a D, settings: MigrationSettings) -> Self {
        Self {
            source,
            destination,
            settings,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Flag that stops the run between versions once set
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Snapshot both registries and compare them, without writing anything
    pub fn compare(&self) -> Result<(RegistrySnapshot, RegistrySnapshot, Comparison)> {
        info!(
            source = %self.source.describe(),
            destination = %self.destination.describe(),
            "Comparing registries"
        );
        let source = RegistrySnapshot::fetch(self.source)?;
        let destination = RegistrySnapshot::fetch(self.destination)?;
        let comparison = compare(&source, &destination);
        comparison.log_summary();
        Ok((source, destination, comparison))
    }

    pub fn run(&self) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let settings = &self.settings;
        let (source, mut destination, comparison) = self.compare()?;
        let mut report = MigrationReport::new(started_at, settings.enabled, settings.dry_run, comparison);

        if !settings.enabled {
            info!("Migration is disabled; only the comparison was run");
            return Ok(report.finish());
        }

        let unresolved = report.comparison.unresolved_collisions(&settings.cleanup);
        if !unresolved.is_empty() {
            error!(
                collisions = unresolved.len(),
                "ID collisions found; clean up the colliding destination subjects before migrating"
            );
            return Err(MigrationError::Precondition {
                count: unresolved.len(),
            });
        }

        if settings.cleanup.is_requested() {
            if settings.dry_run {
                for subject in self.cleanup_targets(&destination) {
                    info!(subject = %subject, "Dry run: would delete destination subject");
                }
            } else {
                self.cleanup(&destination)?;
                destination = RegistrySnapshot::fetch(self.destination)?;
            }
        }

        if settings.dry_run {
            info!("Dry run: no changes will be made to the destination");
        }

        let modes = ModeManager::new(self.destination);
        let global_import = if settings.global_import_mode && !settings.dry_run {
            match modes.scoped_global_mode(Mode::Import) {
                Ok(scope) => Some(scope),
                Err(e) => {
                    modes.warn_scope(Setting::Mode, Mode::Import.as_str(), &e);
                    None
                }
            }
        } else {
            None
        };

        let pass = MigrationEngine::new(&modes, settings.engine_options())
            .with_abort_flag(self.abort_handle())
            .run(&source, &destination);
        let mut units = pass.units;
        let mut cancelled = pass.cancelled;

        let queued = units.iter().any(|u| u.status == UnitStatus::Conflict);
        if !settings.dry_run && !cancelled && queued {
            let outcome = RetryCoordinator::new(&modes, settings.preserve_ids)
                .with_abort_flag(self.abort_handle())
                .run(&mut units);
            cancelled = outcome.cancelled;
        }

        drop(global_import);

        if let Some(mode) = settings.mode_after_migration.filter(|_| !settings.dry_run) {
            match modes.set_global_mode(mode) {
                Ok(()) => info!(mode = %mode, "Set destination global mode after migration"),
                Err(e) => modes.warn(GLOBAL_SCOPE, Setting::Mode, Phase::Switch, mode.as_str(), &e),
            }
        }

        report.cancelled = cancelled || self.abort.load(Ordering::SeqCst);
        report.record_units(units);
        report.warnings = modes.take_warnings();

        if !settings.dry_run && !report.cancelled {
            match self.validate(&source) {
                Ok(missing) => report.missing = missing,
                Err(e) => warn!(error = %e, "Post-migration validation could not read the destination"),
            }
        }

        let report = report.finish();
        info!(
            migrated = report.total_migrated(),
            skipped = report.total_skipped(),
            failed = report.total_failed(),
            warnings = report.warnings.len(),
            "Migration finished"
        );
        Ok(report)
    }

    fn cleanup_targets(&self, destination: &RegistrySnapshot) -> Vec<String> {
        match &self.settings.cleanup {
            Cleanup::None => Vec::new(),
            Cleanup::All => destination.subject_names().map(String::from).collect(),
            Cleanup::Subjects(subjects) => subjects.clone(),
        }
    }

    /// Delete the configured destination subjects
    fn cleanup(&self, destination: &RegistrySnapshot) -> Result<()> {
        let permanent = self.settings.permanent_delete;
        for subject in self.cleanup_targets(destination) {
            match self.destination.delete_subject(&subject, permanent) {
                Ok(versions) => info!(subject = %subject, versions = versions.len(), permanent, "Deleted destination subject"),
                Err(e) if e.is_not_found() => info!(subject = %subject, "Destination subject not present; nothing to delete"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Source versions whose content is not in the destination subject
    fn validate(&self, source: &RegistrySnapshot) -> Result<Vec<MissingItem>> {
        let destination = RegistrySnapshot::fetch(self.destination)?;
        let mut missing = Vec::new();

        for subject in source.subjects() {
            let Some(dest) = destination.subject(&subject.name) else {
                missing.push(MissingItem {
                    subject: subject.name.clone(),
                    version: None,
                    source_id: None,
                });
                continue;
            };
            for version in &subject.versions {
                if dest.find_content(&version.schema).is_none() {
                    missing.push(MissingItem {
                        subject: subject.name.clone(),
                        version: Some(version.version),
                        source_id: Some(version.id),
                    });
                }
            }
        }

        if missing.is_empty() {
            info!("Validation passed: every source version is present in the destination");
        } else {
            warn!(missing = missing.len(), "Validation found source versions missing from the destination");
        }
        Ok(missing)
    }
}
