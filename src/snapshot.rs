//! Point-in-time copy of a registry's subjects and versions

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::client::{ClientResult, RegistryClient};
use crate::schema::{SchemaVersion, Subject};

/// Every subject of one registry, in the order the registry listed them
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    subjects: Vec<Subject>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl RegistrySnapshot {
    pub fn new(subjects: Vec<Subject>) -> Self {
        let index = subjects
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self { subjects, index }
    }

    /// Read every subject and version from the registry
    pub fn fetch<C: RegistryClient + ?Sized>(client: &C) -> ClientResult<Self> {
        Self::read(client, false)
    }

    /// Like [`fetch`](Self::fetch), also reading each subject's mode and compatibility
    pub fn fetch_with_config<C: RegistryClient + ?Sized>(client: &C) -> ClientResult<Self> {
        Self::read(client, true)
    }

    fn read<C: RegistryClient + ?Sized>(client: &C, with_config: bool) -> ClientResult<Self> {
        let names = client.list_subjects()?;
        let mut subjects = Vec::with_capacity(names.len());

        for name in names {
            let versions = client.list_versions(&name)?;
            debug!(subject = %name, count = versions.len(), "listing versions");
            let schemas = versions
                .into_iter()
                .map(|v| client.get_version(&name, v))
                .collect::<ClientResult<Vec<SchemaVersion>>>()?;

            let mut subject = Subject::new(name, schemas);
            if with_config {
                subject.mode = Some(client.get_mode(&subject.name)?);
                subject.compatibility = Some(client.get_compatibility(&subject.name)?);
            }
            subjects.push(subject);
        }

        let snapshot = Self::new(subjects);
        info!(
            registry = %client.describe(),
            subjects = snapshot.subjects.len(),
            versions = snapshot.version_count(),
            "Read registry snapshot"
        );
        Ok(snapshot)
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn subject(&self, name: &str) -> Option<&Subject> {
        self.index.get(name).map(|&i| &self.subjects[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn subject_names(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.name.as_str())
    }

    /// Total number of versions across all subjects
    pub fn version_count(&self) -> usize {
        self.subjects.iter().map(|s| s.versions.len()).sum()
    }

    /// Number of versions a subject holds, zero when it is absent
    pub fn versions_of(&self, name: &str) -> usize {
        self.subject(name).map_or(0, |s| s.versions.len())
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Iterate every version of every subject
    pub fn all_versions(&self) -> impl Iterator<Item = &SchemaVersion> {
        self.subjects.iter().flat_map(|s| s.versions.iter())
    }
}
