//! Final migration report

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::compare::{Comparison, DifferenceKind};
use crate::diff::SchemaDiff;
use crate::engine::{MigrationUnit, UnitStatus};
use crate::mode::StateWarning;

/// Per-subject outcome counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub skipped: usize,
    /// Includes versions registered on retry
    pub migrated: usize,
    pub failed: usize,
    /// Never attempted, because of a dry run or cancellation
    pub pending: usize,
}

/// A unit that ended in failure
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub subject: String,
    pub version: u32,
    pub source_id: u32,
    pub status: UnitStatus,
    pub cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<SchemaDiff>,
}

/// Source content still absent from the destination after migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingItem {
    pub subject: String,
    /// `None` when the whole subject is missing
    pub version: Option<u32>,
    pub source_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub migration_enabled: bool,
    pub cancelled: bool,
    pub comparison: Comparison,
    pub subjects: Vec<SubjectSummary>,
    pub failures: Vec<FailureRecord>,
    /// Mode or compatibility changes that could not be made or undone
    pub warnings: Vec<StateWarning>,
    /// Empty unless post-migration validation ran
    pub missing: Vec<MissingItem>,
    #[serde(skip)]
    pub units: Vec<MigrationUnit>,
}

impl MigrationReport {
    pub fn new(started_at: DateTime<Utc>, migration_enabled: bool, dry_run: bool, comparison: Comparison) -> Self {
        Self {
            started_at,
            finished_at: None,
            dry_run,
            migration_enabled,
            cancelled: false,
            comparison,
            subjects: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            missing: Vec::new(),
            units: Vec::new(),
        }
    }

    /// Aggregate unit outcomes into per-subject counts and failure records
    pub fn record_units(&mut self, units: Vec<MigrationUnit>) {
        self.subjects.clear();
        self.failures.clear();

        for unit in &units {
            let summary = match self.subjects.iter_mut().position(|s| s.subject == unit.subject()) {
                Some(i) => &mut self.subjects[i],
                None => {
                    self.subjects.push(SubjectSummary {
                        subject: unit.subject().to_string(),
                        ..SubjectSummary::default()
                    });
                    let last = self.subjects.len() - 1;
                    &mut self.subjects[last]
                }
            };

            match unit.status {
                UnitStatus::Skipped => summary.skipped += 1,
                UnitStatus::NotStarted => summary.pending += 1,
                status if status.is_migrated() => summary.migrated += 1,
                _ => summary.failed += 1,
            }

            if unit.status.is_failure() {
                self.failures.push(FailureRecord {
                    subject: unit.subject().to_string(),
                    version: unit.version(),
                    source_id: unit.schema.id,
                    status: unit.status,
                    cause: unit.detail.clone().unwrap_or_default(),
                    diff: unit.diff.clone(),
                });
            }
        }

        self.units = units;
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    fn total(&self, pick: impl Fn(&SubjectSummary) -> usize) -> usize {
        self.subjects.iter().map(pick).sum()
    }

    pub fn total_migrated(&self) -> usize {
        self.total(|s| s.migrated)
    }

    pub fn total_skipped(&self) -> usize {
        self.total(|s| s.skipped)
    }

    pub fn total_failed(&self) -> usize {
        self.total(|s| s.failed)
    }

    /// Units with the given status
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    /// Anything an operator has to look at
    pub fn has_problems(&self) -> bool {
        !self.failures.is_empty() || !self.warnings.is_empty() || !self.missing.is_empty()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.comparison;
        writeln!(f, "Schema registry migration report")?;
        writeln!(f, "  started:  {}", self.started_at.to_rfc3339())?;
        if let Some(finished) = self.finished_at {
            writeln!(f, "  finished: {}", finished.to_rfc3339())?;
        }
        writeln!(f)?;

        writeln!(f, "Comparison")?;
        writeln!(f, "  common subjects:           {}", c.common_subjects.len())?;
        writeln!(f, "  source-only subjects:      {}", c.source_only.len())?;
        writeln!(f, "  destination-only subjects: {}", c.destination_only.len())?;
        writeln!(
            f,
            "  version differences:       {}",
            c.count(DifferenceKind::MissingInDestination) + c.count(DifferenceKind::MissingInSource)
        )?;
        writeln!(f, "  content differences:       {}", c.count(DifferenceKind::ContentDiffers))?;
        writeln!(f, "  id differences:            {}", c.count(DifferenceKind::IdDiffers))?;

        if !c.collisions.is_empty() {
            writeln!(f)?;
            writeln!(f, "ID collisions ({})", c.collisions.len())?;
            for collision in &c.collisions {
                writeln!(
                    f,
                    "  id {}: source {} vs destination {}",
                    collision.id,
                    collision.source.key(),
                    collision.destination.key()
                )?;
                write_indented(f, &collision.diff.to_string())?;
            }
        }

        if !self.migration_enabled {
            writeln!(f)?;
            return writeln!(f, "Migration disabled: comparison only");
        }

        writeln!(f)?;
        let title = if self.dry_run { "Subjects (dry run)" } else { "Subjects" };
        writeln!(f, "{}", title)?;
        for s in &self.subjects {
            write!(f, "  {}: {} migrated, {} skipped, {} failed", s.subject, s.migrated, s.skipped, s.failed)?;
            if s.pending > 0 {
                write!(f, ", {} not started", s.pending)?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "  total: {} migrated, {} skipped, {} failed",
            self.total_migrated(),
            self.total_skipped(),
            self.total_failed()
        )?;

        if self.dry_run {
            let planned: Vec<&MigrationUnit> = self
                .units
                .iter()
                .filter(|u| u.status == UnitStatus::NotStarted && u.detail.is_some())
                .collect();
            if !planned.is_empty() {
                writeln!(f)?;
                writeln!(f, "Planned")?;
                for unit in planned {
                    writeln!(f, "  {}: {}", unit.schema.key(), unit.detail.as_deref().unwrap_or_default())?;
                }
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures ({})", self.failures.len())?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "  {}/v{} (id {}) {}: {}",
                    failure.subject, failure.version, failure.source_id, failure.status, failure.cause
                )?;
                if let Some(diff) = &failure.diff {
                    write_indented(f, &diff.to_string())?;
                }
            }
        }

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Unrestored registry state ({})", self.warnings.len())?;
            for warning in &self.warnings {
                writeln!(f, "  {}", warning)?;
            }
        }

        if !self.missing.is_empty() {
            writeln!(f)?;
            writeln!(f, "Still missing from destination ({})", self.missing.len())?;
            for item in &self.missing {
                match item.version {
                    Some(version) => writeln!(f, "  {}/v{}", item.subject, version)?,
                    None => writeln!(f, "  {} (entire subject)", item.subject)?,
                }
            }
        }

        if self.cancelled {
            writeln!(f)?;
            writeln!(f, "Run was cancelled before every version was processed")?;
        }
        Ok(())
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    for line in text.lines() {
        writeln!(f, "      {}", line)?;
    }
    Ok(())
}
