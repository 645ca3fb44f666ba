//! First migration pass: register every source version in the destination
//!
//! Subjects are processed in source listing order and versions strictly
//! ascending within a subject. Each version becomes a [`MigrationUnit`] whose
//! status records what happened to it. Errors from individual registrations
//! are recorded on the unit and never stop the pass.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::checksum::Checksum;
use crate::client::{ClientResult, RegistryClient};
use crate::diff::SchemaDiff;
use crate::error::RegistryError;
use crate::mode::{ModeManager, ModeScope};
use crate::schema::{Mode, SchemaVersion, Subject};
use crate::snapshot::RegistrySnapshot;

/// Where a unit ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    NotStarted,
    Skipped,
    Migrated,
    /// Rejected as incompatible, queued for the retry pass
    Conflict,
    RetriedMigrated,
    RetriedFailed,
    OtherFailure,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::NotStarted => "not started",
            UnitStatus::Skipped => "skipped",
            UnitStatus::Migrated => "migrated",
            UnitStatus::Conflict => "conflict",
            UnitStatus::RetriedMigrated => "migrated on retry",
            UnitStatus::RetriedFailed => "failed on retry",
            UnitStatus::OtherFailure => "failed",
        }
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self, UnitStatus::Migrated | UnitStatus::RetriedMigrated)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            UnitStatus::Conflict | UnitStatus::RetriedFailed | UnitStatus::OtherFailure
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source version and what happened to it
#[derive(Debug, Clone, Serialize)]
pub struct MigrationUnit {
    pub schema: SchemaVersion,
    pub status: UnitStatus,
    /// Id the destination assigned, when registered
    pub destination_id: Option<u32>,
    /// Failure cause, dry-run verdict or id mismatch note
    pub detail: Option<String>,
    /// Against the latest destination content, for incompatible versions
    pub diff: Option<SchemaDiff>,
}

impl MigrationUnit {
    pub fn new(schema: SchemaVersion) -> Self {
        Self {
            schema,
            status: UnitStatus::NotStarted,
            destination_id: None,
            detail: None,
            diff: None,
        }
    }

    pub fn subject(&self) -> &str {
        &self.schema.subject
    }

    pub fn version(&self) -> u32 {
        self.schema.version
    }

    pub(crate) fn fail(&mut self, status: UnitStatus, cause: impl Into<String>) {
        self.status = status;
        self.detail = Some(cause.into());
    }

    /// Record a successful registration, noting when the registry did not keep the id
    pub(crate) fn registered(&mut self, status: UnitStatus, id: u32, preserve_id: bool) {
        self.status = status;
        self.destination_id = Some(id);
        self.detail = (preserve_id && id != self.schema.id)
            .then(|| format!("registry assigned id {} instead of {}", id, self.schema.id));
    }
}

/// Engine toggles
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub preserve_ids: bool,
    /// Queue incompatible versions for the retry pass instead of failing them
    pub auto_compatibility: bool,
    pub dry_run: bool,
}

/// Units of one pass, in processing order
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub units: Vec<MigrationUnit>,
    /// The abort flag was raised before every unit was reached
    pub cancelled: bool,
}

impl PassOutcome {
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }
}

pub struct MigrationEngine<'m, 'c, C: RegistryClient + ?Sized> {
    modes: &'m ModeManager<'c, C>,
    options: EngineOptions,
    abort: Arc<AtomicBool>,
}

impl<'m, 'c, C: RegistryClient + ?Sized> MigrationEngine<'m, 'c, C> {
    pub fn new(modes: &'m ModeManager<'c, C>, options: EngineOptions) -> Self {
        Self {
            modes,
            options,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an abort flag; it is checked before each unit
    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Run the first pass of `source` against the current `destination`
    pub fn run(&self, source: &RegistrySnapshot, destination: &RegistrySnapshot) -> PassOutcome {
        let mut units: Vec<MigrationUnit> = source
            .all_versions()
            .cloned()
            .map(MigrationUnit::new)
            .collect();

        let mut start = 0;
        for subject in source.subjects() {
            let end = start + subject.versions.len();
            let slice = &mut units[start..end];
            start = end;

            if self.process_subject(subject, destination.subject(&subject.name), slice) {
                warn!(subject = %subject.name, "Migration cancelled");
                return PassOutcome { units, cancelled: true };
            }
        }

        PassOutcome { units, cancelled: false }
    }

    fn cancelled(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Returns `true` when the run was cancelled part way
    fn process_subject(&self, subject: &Subject, destination: Option<&Subject>, units: &mut [MigrationUnit]) -> bool {
        let mut existing: HashSet<Checksum> = destination
            .map(|d| d.versions.iter().map(SchemaVersion::checksum).collect())
            .unwrap_or_default();
        let mut latest: Option<String> = destination.and_then(Subject::latest).map(|v| v.schema.clone());
        let eligible = self.options.preserve_ids && destination.map_or(true, Subject::is_empty);

        info!(
            subject = %subject.name,
            versions = units.len(),
            preserve_ids = eligible,
            "Migrating subject"
        );

        // Entered on the first version that needs registering, restored on return
        let mut import: Option<ModeScope<'m, 'c, C>> = None;
        let mut import_failure: Option<String> = None;

        for unit in units.iter_mut() {
            if self.cancelled() {
                return true;
            }

            let checksum = unit.schema.checksum();
            if existing.contains(&checksum) {
                debug!(unit = %unit.schema.key(), checksum = checksum.short(), "already present in destination");
                unit.status = UnitStatus::Skipped;
                continue;
            }

            if self.options.dry_run {
                self.plan(unit);
                continue;
            }

            if eligible {
                if let Some(cause) = &import_failure {
                    unit.fail(UnitStatus::OtherFailure, cause.clone());
                    continue;
                }
                if import.is_none() {
                    match self.modes.scoped_mode(&subject.name, Mode::Import) {
                        Ok(scope) => import = Some(scope),
                        Err(e) => {
                            error!(subject = %subject.name, error = %e, "Could not enter IMPORT mode");
                            let cause = e.to_string();
                            unit.fail(UnitStatus::OtherFailure, cause.clone());
                            import_failure = Some(cause);
                            continue;
                        }
                    }
                }
            }

            match register_version(self.modes, &unit.schema, eligible) {
                Ok(id) => {
                    info!(unit = %unit.schema.key(), id, "Migrated");
                    unit.registered(UnitStatus::Migrated, id, eligible);
                    existing.insert(checksum);
                    latest = Some(unit.schema.schema.clone());
                }
                Err(e) => self.record_failure(unit, e, latest.as_deref()),
            }
        }

        false
    }

    /// Dry run: ask the destination whether the version would be accepted
    fn plan(&self, unit: &mut MigrationUnit) {
        let client = self.modes.client();
        let verdict = client.check_compatibility(unit.subject(), unit.schema.schema_type, &unit.schema.schema);
        unit.detail = Some(match verdict {
            Ok(true) => "would register".to_string(),
            Ok(false) => "would be rejected as incompatible".to_string(),
            Err(e) => format!("compatibility check failed: {}", e),
        });
        info!(unit = %unit.schema.key(), verdict = unit.detail.as_deref().unwrap_or_default(), "Dry run");
    }

    fn record_failure(&self, unit: &mut MigrationUnit, e: RegistryError, latest: Option<&str>) {
        if e.is_conflict() {
            unit.diff = latest.map(|dest| SchemaDiff::between(&unit.schema.schema, dest, unit.schema.schema_type));
            let status = if self.options.auto_compatibility {
                UnitStatus::Conflict
            } else {
                UnitStatus::OtherFailure
            };
            warn!(unit = %unit.schema.key(), error = %e, "Incompatible with destination");
            unit.fail(status, e.to_string());
        } else {
            error!(unit = %unit.schema.key(), error = %e, "Registration failed");
            unit.fail(UnitStatus::OtherFailure, e.to_string());
        }
    }
}

/// Register one version.
///
/// With `preserve_id` the subject must already be in IMPORT mode and the
/// source id is requested. Otherwise the subject is switched to READWRITE for
/// the single call when it is in any other mode.
pub(crate) fn register_version<C: RegistryClient + ?Sized>(
    modes: &ModeManager<'_, C>,
    version: &SchemaVersion,
    preserve_id: bool,
) -> ClientResult<u32> {
    let client = modes.client();
    if preserve_id {
        let id = client.register_schema(&version.subject, version.schema_type, &version.schema, Some(version.id))?;
        if id != version.id {
            warn!(unit = %version.key(), requested = version.id, assigned = id, "Registry did not keep the schema id");
        }
        Ok(id)
    } else {
        modes.with_mode(&version.subject, Mode::ReadWrite, || {
            client.register_schema(&version.subject, version.schema_type, &version.schema, None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Call, InMemoryRegistry, Operation};
    use crate::schema::SchemaType;

    const A: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"}]}"#;
    const AB: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":""}]}"#;
    const BROKEN: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"string"}]}"#;

    fn run(source: &InMemoryRegistry, destination: &InMemoryRegistry, options: EngineOptions) -> PassOutcome {
        let src = RegistrySnapshot::fetch(source).unwrap();
        let dst = RegistrySnapshot::fetch(destination).unwrap();
        let modes = ModeManager::new(destination);
        MigrationEngine::new(&modes, options).run(&src, &dst)
    }

    fn registered(destination: &InMemoryRegistry) -> Vec<(String, Option<u32>)> {
        destination
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Register { subject, id, .. } => Some((subject, id)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_registers_missing_versions() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        let destination = InMemoryRegistry::new("dst");

        let outcome = run(&source, &destination, EngineOptions::default());
        assert_eq!(outcome.count(UnitStatus::Migrated), 2);
        assert!(!outcome.cancelled);
        assert_eq!(destination.versions_of("orders").len(), 2);
        assert_eq!(registered(&destination), vec![("orders".to_string(), None), ("orders".to_string(), None)]);
    }

    #[test]
    fn test_identical_content_is_skipped() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        let destination = InMemoryRegistry::new("dst");
        // Same content under a different version number still counts as present
        destination.seed(SchemaVersion::new("orders", 4, 99, SchemaType::Avro, A));

        let outcome = run(&source, &destination, EngineOptions::default());
        assert_eq!(outcome.units[0].status, UnitStatus::Skipped);
        assert_eq!(outcome.units[1].status, UnitStatus::Migrated);
    }

    #[test]
    fn test_preserves_ids_on_empty_subject() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        let destination = InMemoryRegistry::new("dst");

        let options = EngineOptions {
            preserve_ids: true,
            ..EngineOptions::default()
        };
        let outcome = run(&source, &destination, options);
        let ids: Vec<Option<u32>> = outcome.units.iter().map(|u| u.destination_id).collect();
        assert_eq!(ids, vec![Some(10), Some(11)]);

        // IMPORT entered once and removed after the subject
        let mode_writes: Vec<Call> = destination
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetMode(..) | Call::DeleteMode(_)))
            .collect();
        assert_eq!(
            mode_writes,
            vec![
                Call::SetMode("orders".to_string(), Mode::Import),
                Call::DeleteMode("orders".to_string()),
            ]
        );
        assert_eq!(destination.get_mode("orders").unwrap(), Mode::ReadWrite);
    }

    #[test]
    fn test_non_empty_subject_gets_new_ids() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        let destination = InMemoryRegistry::new("dst");
        destination.seed_subject("orders", &[(50, A)]);

        let options = EngineOptions {
            preserve_ids: true,
            ..EngineOptions::default()
        };
        let outcome = run(&source, &destination, options);
        assert_eq!(outcome.units[1].status, UnitStatus::Migrated);
        assert_eq!(outcome.units[1].destination_id, Some(51));
        assert_eq!(registered(&destination), vec![("orders".to_string(), None)]);
    }

    #[test]
    fn test_import_rejection_fails_whole_subject() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        source.seed_subject("payments", &[(12, A)]);
        let destination = InMemoryRegistry::new("dst");
        destination.fail_next(
            Operation::SetMode,
            Some("orders"),
            RegistryError::WriteRejected {
                code: Some(42205),
                message: "import not allowed".into(),
            },
        );

        let options = EngineOptions {
            preserve_ids: true,
            ..EngineOptions::default()
        };
        let outcome = run(&source, &destination, options);
        assert_eq!(outcome.units[0].status, UnitStatus::OtherFailure);
        assert_eq!(outcome.units[1].status, UnitStatus::OtherFailure);
        assert!(outcome.units[1].detail.as_deref().unwrap().contains("import not allowed"));
        // Other subjects carry on
        assert_eq!(outcome.units[2].status, UnitStatus::Migrated);
        assert_eq!(outcome.units[2].destination_id, Some(12));
    }

    #[test]
    fn test_read_only_subject_is_switched_for_the_call() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A)]);
        let destination = InMemoryRegistry::new("dst");
        destination.set_mode("orders", Mode::ReadOnly).unwrap();

        let outcome = run(&source, &destination, EngineOptions::default());
        assert_eq!(outcome.units[0].status, UnitStatus::Migrated);
        assert_eq!(destination.subject_mode("orders"), Some(Mode::ReadOnly));
    }

    #[test]
    fn test_conflict_routing() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, BROKEN)]);

        for (auto_compatibility, expected) in [(true, UnitStatus::Conflict), (false, UnitStatus::OtherFailure)] {
            let destination = InMemoryRegistry::new("dst");
            destination.seed_subject("orders", &[(1, A)]);
            let options = EngineOptions {
                auto_compatibility,
                ..EngineOptions::default()
            };
            let outcome = run(&source, &destination, options);
            let unit = &outcome.units[0];
            assert_eq!(unit.status, expected);
            let diff = unit.diff.as_ref().unwrap();
            assert_eq!(diff.type_changes[0].field, "a");
        }
    }

    #[test]
    fn test_transport_failure_does_not_stop_the_pass() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, AB)]);
        let destination = InMemoryRegistry::new("dst");
        destination.fail_next(Operation::Register, Some("orders"), RegistryError::Transport("503".into()));

        let outcome = run(&source, &destination, EngineOptions::default());
        assert_eq!(outcome.units[0].status, UnitStatus::OtherFailure);
        assert_eq!(outcome.units[1].status, UnitStatus::Migrated);
    }

    #[test]
    fn test_dry_run_only_checks_compatibility() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A), (11, BROKEN)]);
        let destination = InMemoryRegistry::new("dst");
        destination.seed_subject("orders", &[(1, A)]);

        let options = EngineOptions {
            dry_run: true,
            preserve_ids: true,
            auto_compatibility: true,
        };
        let outcome = run(&source, &destination, options);
        assert_eq!(outcome.units[0].status, UnitStatus::Skipped);
        assert_eq!(outcome.units[1].status, UnitStatus::NotStarted);
        assert_eq!(outcome.units[1].detail.as_deref(), Some("would be rejected as incompatible"));
        assert!(destination.calls().iter().all(|c| !c.is_write()));
    }

    #[test]
    fn test_abort_flag_leaves_units_not_started() {
        let source = InMemoryRegistry::new("src");
        source.seed_subject("orders", &[(10, A)]);
        let destination = InMemoryRegistry::new("dst");

        let src = RegistrySnapshot::fetch(&source).unwrap();
        let dst = RegistrySnapshot::fetch(&destination).unwrap();
        let modes = ModeManager::new(&destination);
        let abort = Arc::new(AtomicBool::new(true));
        let outcome = MigrationEngine::new(&modes, EngineOptions::default())
            .with_abort_flag(abort)
            .run(&src, &dst);

        assert!(outcome.cancelled);
        assert_eq!(outcome.units[0].status, UnitStatus::NotStarted);
        assert!(registered(&destination).is_empty());
    }
}
