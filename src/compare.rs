//! Source/destination comparison and ID collision detection
//!
//! [`compare`] is a pure function over two snapshots. It never talks to a
//! registry, so it can run on fixed data and always runs before anything is
//! written to the destination.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::diff::SchemaDiff;
use crate::migrator::Cleanup;
use crate::schema::SchemaVersion;
use crate::snapshot::RegistrySnapshot;

/// The same global id bound to different content in the two registries
#[derive(Debug, Clone, Serialize)]
pub struct IdCollision {
    pub id: u32,
    pub source: SchemaVersion,
    pub destination: SchemaVersion,
    pub diff: SchemaDiff,
}

/// Version counts of one subject on each side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectDelta {
    pub subject: String,
    pub source_versions: usize,
    pub destination_versions: usize,
}

impl SubjectDelta {
    /// Positive when the source holds more versions
    pub fn delta(&self) -> i64 {
        self.source_versions as i64 - self.destination_versions as i64
    }
}

/// How a version number differs between the registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    MissingInDestination,
    MissingInSource,
    ContentDiffers,
    IdDiffers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionDifference {
    pub subject: String,
    pub version: u32,
    pub kind: DifferenceKind,
    pub source_id: Option<u32>,
    pub destination_id: Option<u32>,
}

/// Result of comparing two registries
#[derive(Debug, Clone, Default, Serialize)]
pub struct Comparison {
    pub common_subjects: Vec<String>,
    pub source_only: Vec<String>,
    pub destination_only: Vec<String>,
    pub deltas: Vec<SubjectDelta>,
    pub differences: Vec<VersionDifference>,
    pub collisions: Vec<IdCollision>,
}

/// Compare a source snapshot against a destination snapshot
pub fn compare(source: &RegistrySnapshot, destination: &RegistrySnapshot) -> Comparison {
    let mut comparison = Comparison::default();

    // id -> first destination version carrying it
    let mut by_id: HashMap<u32, &SchemaVersion> = HashMap::new();
    for version in destination.all_versions() {
        by_id.entry(version.id).or_insert(version);
    }

    for subject in source.subjects() {
        let dest = destination.subject(&subject.name);
        match dest {
            Some(_) => comparison.common_subjects.push(subject.name.clone()),
            None => comparison.source_only.push(subject.name.clone()),
        }
        comparison.deltas.push(SubjectDelta {
            subject: subject.name.clone(),
            source_versions: subject.versions.len(),
            destination_versions: destination.versions_of(&subject.name),
        });

        for version in &subject.versions {
            if let Some(existing) = by_id.get(&version.id) {
                if !existing.same_content(version) {
                    comparison.collisions.push(IdCollision {
                        id: version.id,
                        source: version.clone(),
                        destination: (*existing).clone(),
                        diff: SchemaDiff::between(&version.schema, &existing.schema, version.schema_type),
                    });
                }
            }

            let Some(dest) = dest else { continue };
            match dest.get_version(version.version) {
                None => comparison.differences.push(VersionDifference {
                    subject: subject.name.clone(),
                    version: version.version,
                    kind: DifferenceKind::MissingInDestination,
                    source_id: Some(version.id),
                    destination_id: None,
                }),
                Some(other) => {
                    if !other.same_content(version) {
                        comparison.differences.push(VersionDifference {
                            subject: subject.name.clone(),
                            version: version.version,
                            kind: DifferenceKind::ContentDiffers,
                            source_id: Some(version.id),
                            destination_id: Some(other.id),
                        });
                    }
                    if other.id != version.id {
                        comparison.differences.push(VersionDifference {
                            subject: subject.name.clone(),
                            version: version.version,
                            kind: DifferenceKind::IdDiffers,
                            source_id: Some(version.id),
                            destination_id: Some(other.id),
                        });
                    }
                }
            }
        }
    }

    for subject in destination.subjects() {
        let Some(src) = source.subject(&subject.name) else {
            comparison.destination_only.push(subject.name.clone());
            comparison.deltas.push(SubjectDelta {
                subject: subject.name.clone(),
                source_versions: 0,
                destination_versions: subject.versions.len(),
            });
            continue;
        };
        for version in &subject.versions {
            if src.get_version(version.version).is_none() {
                comparison.differences.push(VersionDifference {
                    subject: subject.name.clone(),
                    version: version.version,
                    kind: DifferenceKind::MissingInSource,
                    source_id: None,
                    destination_id: Some(version.id),
                });
            }
        }
    }

    comparison
}

impl Comparison {
    pub fn has_collisions(&self) -> bool {
        !self.collisions.is_empty()
    }

    pub fn count(&self, kind: DifferenceKind) -> usize {
        self.differences.iter().filter(|d| d.kind == kind).count()
    }

    /// Collisions whose destination subject the requested cleanup does not delete
    pub fn unresolved_collisions(&self, cleanup: &Cleanup) -> Vec<&IdCollision> {
        self.collisions
            .iter()
            .filter(|c| !cleanup.covers(&c.destination.subject))
            .collect()
    }

    /// Log the comparison the way operators read it before deciding to migrate
    pub fn log_summary(&self) {
        info!("Comparison complete:");
        info!("- Common subjects: {}", self.common_subjects.len());
        info!("- Source-only subjects: {}", self.source_only.len());
        info!("- Destination-only subjects: {}", self.destination_only.len());
        info!(
            "- Version differences: {}",
            self.count(DifferenceKind::MissingInDestination) + self.count(DifferenceKind::MissingInSource)
        );
        info!("- Schema differences: {}", self.count(DifferenceKind::ContentDiffers));
        info!("- ID differences: {}", self.count(DifferenceKind::IdDiffers));

        if self.collisions.is_empty() {
            info!("No ID collisions found");
        } else {
            warn!("Found {} ID collisions", self.collisions.len());
            for collision in &self.collisions {
                warn!(
                    id = collision.id,
                    source = %collision.source.key(),
                    destination = %collision.destination.key(),
                    "ID collision"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaType, Subject};

    fn version(subject: &str, version: u32, id: u32, schema: &str) -> SchemaVersion {
        SchemaVersion::new(subject, version, id, SchemaType::Avro, schema)
    }

    fn snapshot(versions: Vec<SchemaVersion>) -> RegistrySnapshot {
        let mut subjects: Vec<Subject> = Vec::new();
        for v in versions {
            match subjects.iter_mut().find(|s| s.name == v.subject) {
                Some(s) => s.versions.push(v),
                None => subjects.push(Subject::new(v.subject.clone(), vec![v])),
            }
        }
        RegistrySnapshot::new(subjects)
    }

    #[test]
    fn test_identical_registries_have_no_collisions() {
        let source = snapshot(vec![version("orders", 1, 10, "\"int\"")]);
        let destination = source.clone();

        let comparison = compare(&source, &destination);
        assert!(!comparison.has_collisions());
        assert!(comparison.differences.is_empty());
        assert_eq!(comparison.common_subjects, vec!["orders"]);
    }

    #[test]
    fn test_same_id_different_content_collides() {
        let source = snapshot(vec![version("orders", 1, 10, "\"int\"")]);
        let destination = snapshot(vec![version("payments", 1, 10, "\"string\"")]);

        let comparison = compare(&source, &destination);
        assert_eq!(comparison.collisions.len(), 1);
        let collision = &comparison.collisions[0];
        assert_eq!(collision.id, 10);
        assert_eq!(collision.source.subject, "orders");
        assert_eq!(collision.destination.subject, "payments");
        assert_eq!(collision.diff.mismatches[0].attribute, "type");

        assert_eq!(comparison.source_only, vec!["orders"]);
        assert_eq!(comparison.destination_only, vec!["payments"]);
    }

    #[test]
    fn test_shared_id_with_identical_content_is_not_a_collision() {
        let source = snapshot(vec![version("orders", 1, 10, "\"int\"")]);
        let destination = snapshot(vec![version("orders-copy", 1, 10, "\"int\"")]);
        assert!(!compare(&source, &destination).has_collisions());
    }

    #[test]
    fn test_version_differences_and_deltas() {
        let source = snapshot(vec![
            version("orders", 1, 10, "\"int\""),
            version("orders", 2, 11, "\"long\""),
        ]);
        let destination = snapshot(vec![
            version("orders", 1, 20, "\"int\""),
            version("orders", 3, 21, "\"float\""),
        ]);

        let comparison = compare(&source, &destination);
        assert_eq!(comparison.count(DifferenceKind::IdDiffers), 1);
        assert_eq!(comparison.count(DifferenceKind::MissingInDestination), 1);
        assert_eq!(comparison.count(DifferenceKind::MissingInSource), 1);
        assert_eq!(comparison.count(DifferenceKind::ContentDiffers), 0);
        assert_eq!(comparison.deltas[0].delta(), 0);
    }

    #[test]
    fn test_cleanup_resolves_collisions() {
        let source = snapshot(vec![version("orders", 1, 10, "\"int\"")]);
        let destination = snapshot(vec![version("legacy", 1, 10, "\"string\"")]);
        let comparison = compare(&source, &destination);

        assert_eq!(comparison.unresolved_collisions(&Cleanup::None).len(), 1);
        assert!(comparison.unresolved_collisions(&Cleanup::All).is_empty());
        assert!(comparison
            .unresolved_collisions(&Cleanup::Subjects(vec!["legacy".to_string()]))
            .is_empty());
        assert_eq!(
            comparison
                .unresolved_collisions(&Cleanup::Subjects(vec!["other".to_string()]))
                .len(),
            1
        );
    }
}
