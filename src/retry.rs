//! Second pass: retry incompatible versions with compatibility relaxed
//!
//! Units the first pass left in [`UnitStatus::Conflict`] are grouped by
//! subject. Each subject is switched to READWRITE and compatibility NONE for
//! the duration of its retries, then both are put back. Problems with the
//! mode or compatibility changes are warnings; only the registrations
//! themselves decide a unit's outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::client::RegistryClient;
use crate::engine::{register_version, MigrationUnit, UnitStatus};
use crate::mode::{ModeManager, Phase, Setting};
use crate::schema::{Compatibility, Mode};

/// Counts from a retry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct RetryCoordinator<'m, 'c, C: RegistryClient + ?Sized> {
    modes: &'m ModeManager<'c, C>,
    preserve_ids: bool,
    abort: Arc<AtomicBool>,
}

impl<'m, 'c, C: RegistryClient + ?Sized> RetryCoordinator<'m, 'c, C> {
    pub fn new(modes: &'m ModeManager<'c, C>, preserve_ids: bool) -> Self {
        Self {
            modes,
            preserve_ids,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Retry every `Conflict` unit in place
    pub fn run(&self, units: &mut [MigrationUnit]) -> RetryOutcome {
        let mut outcome = RetryOutcome::default();
        let groups = conflict_groups(units);
        if groups.is_empty() {
            return outcome;
        }
        info!(subjects = groups.len(), "Retrying incompatible versions with compatibility NONE");

        for (subject, indices) in groups {
            if self.retry_subject(&subject, &indices, units, &mut outcome) {
                warn!(subject = %subject, "Retry pass cancelled");
                outcome.cancelled = true;
                break;
            }
        }

        info!(
            attempted = outcome.attempted,
            recovered = outcome.recovered,
            failed = outcome.failed,
            "Retry pass complete"
        );
        outcome
    }

    /// Returns `true` when cancelled part way
    fn retry_subject(
        &self,
        subject: &str,
        indices: &[usize],
        units: &mut [MigrationUnit],
        outcome: &mut RetryOutcome,
    ) -> bool {
        let mode = match self.modes.scoped_mode(subject, Mode::ReadWrite) {
            Ok(scope) => Some(scope),
            Err(e) => {
                self.modes.warn_scope(Setting::Mode, Mode::ReadWrite.as_str(), &e);
                None
            }
        };
        let compatibility = match self.modes.scoped_compatibility(subject, Compatibility::None) {
            Ok(scope) => Some(scope),
            Err(e) => {
                self.modes
                    .warn(subject, Setting::Compatibility, Phase::Switch, Compatibility::None.as_str(), &e);
                None
            }
        };

        let mut cancelled = false;
        for &index in indices {
            if self.abort.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            let unit = &mut units[index];
            outcome.attempted += 1;

            let eligible = self.preserve_ids && self.subject_is_empty(subject);
            let result = if eligible {
                self.modes
                    .with_mode(subject, Mode::Import, || register_version(self.modes, &unit.schema, true))
            } else {
                register_version(self.modes, &unit.schema, false)
            };

            match result {
                Ok(id) => {
                    info!(unit = %unit.schema.key(), id, "Migrated on retry");
                    unit.registered(UnitStatus::RetriedMigrated, id, eligible);
                    outcome.recovered += 1;
                }
                Err(e) => {
                    error!(unit = %unit.schema.key(), error = %e, "Retry failed");
                    unit.fail(UnitStatus::RetriedFailed, e.to_string());
                    outcome.failed += 1;
                }
            }
        }

        // Compatibility first, then the mode it was changed under
        drop(compatibility);
        drop(mode);
        cancelled
    }

    /// Live check, since the first pass may have registered versions since the snapshot
    fn subject_is_empty(&self, subject: &str) -> bool {
        match self.modes.client().list_versions(subject) {
            Ok(versions) => versions.is_empty(),
            Err(e) if e.is_not_found() => true,
            Err(_) => false,
        }
    }
}

/// Indices of `Conflict` units grouped by subject in first-appearance order,
/// each group ascending by version
fn conflict_groups(units: &[MigrationUnit]) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, unit) in units.iter().enumerate() {
        if unit.status != UnitStatus::Conflict {
            continue;
        }
        match groups.iter_mut().find(|(subject, _)| subject == unit.subject()) {
            Some((_, indices)) => indices.push(index),
            None => groups.push((unit.subject().to_string(), vec![index])),
        }
    }
    for (_, indices) in &mut groups {
        indices.sort_by_key(|&i| units[i].version());
    }
    groups
}
