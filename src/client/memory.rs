//! In-memory registry
//!
//! Behaves like a Confluent registry for everything the migrator touches:
//! registry-wide id allocation, per-subject versions, modes, compatibility
//! checks and soft/hard deletes. All data is lost when the value is dropped.
//! Every call is recorded, and failures can be injected per operation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{ClientResult, RegistryClient};
use crate::checksum::Checksum;
use crate::diff::SchemaDiff;
use crate::error::RegistryError;
use crate::schema::{Compatibility, CompatibilitySetting, Mode, SchemaType, SchemaVersion};

/// Registry operations, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListSubjects,
    ListVersions,
    GetVersion,
    Register,
    CheckCompatibility,
    GetMode,
    SetMode,
    GetSubjectMode,
    DeleteMode,
    GetGlobalMode,
    SetGlobalMode,
    GetCompatibility,
    SetCompatibility,
    DeleteCompatibility,
    DeleteSubject,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListSubjects,
    ListVersions(String),
    GetVersion(String, u32),
    Register {
        subject: String,
        schema: String,
        id: Option<u32>,
    },
    CheckCompatibility(String),
    GetMode(String),
    SetMode(String, Mode),
    GetSubjectMode(String),
    DeleteMode(String),
    GetGlobalMode,
    SetGlobalMode(Mode),
    GetCompatibility(String),
    SetCompatibility(String, Compatibility),
    DeleteCompatibility(String),
    DeleteSubject(String, bool),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::Register { .. }
                | Call::SetMode(..)
                | Call::DeleteMode(_)
                | Call::SetGlobalMode(_)
                | Call::SetCompatibility(..)
                | Call::DeleteCompatibility(_)
                | Call::DeleteSubject(..)
        )
    }
}

struct InjectedFailure {
    operation: Operation,
    subject: Option<String>,
    error: RegistryError,
}

struct State {
    /// Subjects in creation order, each with versions in insertion order
    subjects: Vec<(String, Vec<SchemaVersion>)>,
    soft_deleted: Vec<(String, Vec<SchemaVersion>)>,
    ids_by_content: HashMap<Checksum, u32>,
    content_by_id: HashMap<u32, Checksum>,
    next_id: u32,
    global_mode: Mode,
    global_compatibility: Compatibility,
    subject_modes: HashMap<String, Mode>,
    subject_compatibility: HashMap<String, Compatibility>,
    calls: Vec<Call>,
    failures: Vec<InjectedFailure>,
}

impl State {
    fn subject(&self, name: &str) -> Option<&Vec<SchemaVersion>> {
        self.subjects.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn subject_mut(&mut self, name: &str) -> &mut Vec<SchemaVersion> {
        let pos = match self.subjects.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.subjects.push((name.to_string(), Vec::new()));
                self.subjects.len() - 1
            }
        };
        &mut self.subjects[pos].1
    }

    fn effective_mode(&self, subject: &str) -> Mode {
        self.subject_modes.get(subject).copied().unwrap_or(self.global_mode)
    }

    fn effective_compatibility(&self, subject: &str) -> Compatibility {
        self.subject_compatibility
            .get(subject)
            .copied()
            .unwrap_or(self.global_compatibility)
    }

    fn bind_id(&mut self, checksum: Checksum, id: u32) {
        self.content_by_id.insert(id, checksum.clone());
        self.ids_by_content.insert(checksum, id);
        self.next_id = self.next_id.max(id + 1);
    }

    fn take_failure(&mut self, operation: Operation, subject: Option<&str>) -> Option<RegistryError> {
        let pos = self.failures.iter().position(|f| {
            f.operation == operation
                && (f.subject.is_none() || f.subject.as_deref() == subject)
        })?;
        Some(self.failures.remove(pos).error)
    }

    fn incompatibility(&self, subject: &str, schema_type: SchemaType, schema: &str) -> Option<String> {
        if self.effective_compatibility(subject) == Compatibility::None {
            return None;
        }
        let latest = self.subject(subject)?.iter().max_by_key(|v| v.version)?;
        let diff = SchemaDiff::between(schema, &latest.schema, schema_type);
        diff.breaks_compatibility().then(|| {
            format!(
                "Schema being registered is incompatible with an earlier schema for subject \"{}\": {}",
                subject,
                diff.to_string().trim_end().replace('\n', "; ")
            )
        })
    }
}

/// A schema registry held in memory
pub struct InMemoryRegistry {
    name: String,
    state: Mutex<State>,
}

impl InMemoryRegistry {
    /// Create an empty registry in READWRITE mode with BACKWARD compatibility
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                subjects: Vec::new(),
                soft_deleted: Vec::new(),
                ids_by_content: HashMap::new(),
                content_by_id: HashMap::new(),
                next_id: 1,
                global_mode: Mode::ReadWrite,
                global_compatibility: Compatibility::Backward,
                subject_modes: HashMap::new(),
                subject_compatibility: HashMap::new(),
                calls: Vec::new(),
                failures: Vec::new(),
            }),
        }
    }

    /// Store a version exactly as given, bypassing modes and compatibility.
    /// Versions are listed in the order they were seeded.
    pub fn seed(&self, version: SchemaVersion) {
        let mut state = self.lock();
        state.bind_id(version.checksum(), version.id);
        let subject = version.subject.clone();
        state.subject_mut(&subject).push(version);
    }

    /// Seed `subject` with `(id, content)` pairs as versions 1, 2, ...
    pub fn seed_subject(&self, subject: &str, schemas: &[(u32, &str)]) {
        for (i, (id, schema)) in schemas.iter().enumerate() {
            self.seed(SchemaVersion::new(subject, i as u32 + 1, *id, SchemaType::Avro, *schema));
        }
    }

    pub fn set_default_compatibility(&self, level: Compatibility) {
        self.lock().global_compatibility = level;
    }

    /// Make the next matching call fail with `error`.
    /// `subject: None` matches the operation on any subject.
    pub fn fail_next(&self, operation: Operation, subject: Option<&str>, error: RegistryError) {
        self.lock().failures.push(InjectedFailure {
            operation,
            subject: subject.map(String::from),
            error,
        });
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Subject-level mode override, if one is set
    pub fn subject_mode(&self, subject: &str) -> Option<Mode> {
        self.lock().subject_modes.get(subject).copied()
    }

    /// Subject-level compatibility override, if one is set
    pub fn subject_compatibility(&self, subject: &str) -> Option<Compatibility> {
        self.lock().subject_compatibility.get(subject).copied()
    }

    /// Versions of a subject, ascending
    pub fn versions_of(&self, subject: &str) -> Vec<SchemaVersion> {
        let mut versions = self.lock().subject(subject).cloned().unwrap_or_default();
        versions.sort_by_key(|v| v.version);
        versions
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and apply any injected failure
    fn enter(&self, call: Call, operation: Operation, subject: Option<&str>) -> ClientResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.take_failure(operation, subject) {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

impl RegistryClient for InMemoryRegistry {
    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }

    fn list_subjects(&self) -> ClientResult<Vec<String>> {
        let state = self.enter(Call::ListSubjects, Operation::ListSubjects, None)?;
        Ok(state
            .subjects
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn list_versions(&self, subject: &str) -> ClientResult<Vec<u32>> {
        let state = self.enter(Call::ListVersions(subject.to_string()), Operation::ListVersions, Some(subject))?;
        match state.subject(subject) {
            Some(versions) if !versions.is_empty() => Ok(versions.iter().map(|v| v.version).collect()),
            _ => Err(RegistryError::NotFound(format!("Subject '{}' not found.", subject))),
        }
    }

    fn get_version(&self, subject: &str, version: u32) -> ClientResult<SchemaVersion> {
        let state = self.enter(Call::GetVersion(subject.to_string(), version), Operation::GetVersion, Some(subject))?;
        state
            .subject(subject)
            .and_then(|versions| versions.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("Version {} not found.", version)))
    }

    fn register_schema(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
        id: Option<u32>,
    ) -> ClientResult<u32> {
        let call = Call::Register {
            subject: subject.to_string(),
            schema: schema.to_string(),
            id,
        };
        let mut state = self.enter(call, Operation::Register, Some(subject))?;

        let mode = state.effective_mode(subject);
        match (mode, id) {
            (Mode::ReadOnly | Mode::ReadOnlyOverride, _) => {
                return Err(RegistryError::WriteRejected {
                    code: Some(42205),
                    message: format!("Subject {} is in read-only mode", subject),
                });
            }
            (Mode::ReadWrite, Some(_)) => {
                return Err(RegistryError::WriteRejected {
                    code: Some(42205),
                    message: format!("Subject {} is not in import mode", subject),
                });
            }
            (Mode::Import, None) => {
                return Err(RegistryError::WriteRejected {
                    code: Some(42205),
                    message: format!("Subject {} is in import mode; an id is required", subject),
                });
            }
            _ => {}
        }

        let checksum = Checksum::from_str(schema);
        if let Some(existing) = state
            .subject(subject)
            .and_then(|versions| versions.iter().find(|v| v.schema == schema))
        {
            return Ok(existing.id);
        }

        if let Some(requested) = id {
            if let Some(bound) = state.content_by_id.get(&requested) {
                if *bound != checksum {
                    return Err(RegistryError::WriteRejected {
                        code: Some(42207),
                        message: format!("Overwrite new schema with id {} is not permitted.", requested),
                    });
                }
            }
        } else if let Some(reason) = state.incompatibility(subject, schema_type, schema) {
            // IMPORT skips compatibility checks, like the real registry
            return Err(RegistryError::Conflict { message: reason });
        }

        let assigned = match (id, state.ids_by_content.get(&checksum)) {
            (Some(requested), _) => requested,
            (None, Some(existing)) => *existing,
            (None, None) => state.next_id,
        };
        state.bind_id(checksum, assigned);

        let versions = state.subject_mut(subject);
        let next_version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        versions.push(SchemaVersion::new(subject, next_version, assigned, schema_type, schema));
        Ok(assigned)
    }

    fn check_compatibility(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> ClientResult<bool> {
        let state = self.enter(
            Call::CheckCompatibility(subject.to_string()),
            Operation::CheckCompatibility,
            Some(subject),
        )?;
        Ok(state.incompatibility(subject, schema_type, schema).is_none())
    }

    fn get_mode(&self, subject: &str) -> ClientResult<Mode> {
        let state = self.enter(Call::GetMode(subject.to_string()), Operation::GetMode, Some(subject))?;
        Ok(state.effective_mode(subject))
    }

    fn set_mode(&self, subject: &str, mode: Mode) -> ClientResult<()> {
        let mut state = self.enter(Call::SetMode(subject.to_string(), mode), Operation::SetMode, Some(subject))?;
        let has_versions = state.subject(subject).map_or(false, |v| !v.is_empty());
        if mode == Mode::Import && has_versions && state.effective_mode(subject) != Mode::Import {
            return Err(RegistryError::WriteRejected {
                code: Some(42205),
                message: format!("Cannot import since found existing subjects: {}", subject),
            });
        }
        state.subject_modes.insert(subject.to_string(), mode);
        Ok(())
    }

    fn get_subject_mode(&self, subject: &str) -> ClientResult<Option<Mode>> {
        let state = self.enter(
            Call::GetSubjectMode(subject.to_string()),
            Operation::GetSubjectMode,
            Some(subject),
        )?;
        Ok(state.subject_modes.get(subject).copied())
    }

    fn delete_mode(&self, subject: &str) -> ClientResult<()> {
        let mut state = self.enter(Call::DeleteMode(subject.to_string()), Operation::DeleteMode, Some(subject))?;
        match state.subject_modes.remove(subject) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(format!(
                "Subject '{}' does not have subject-level mode configured",
                subject
            ))),
        }
    }

    fn get_global_mode(&self) -> ClientResult<Mode> {
        let state = self.enter(Call::GetGlobalMode, Operation::GetGlobalMode, None)?;
        Ok(state.global_mode)
    }

    fn set_global_mode(&self, mode: Mode) -> ClientResult<()> {
        let mut state = self.enter(Call::SetGlobalMode(mode), Operation::SetGlobalMode, None)?;
        state.global_mode = mode;
        Ok(())
    }

    fn get_compatibility(&self, subject: &str) -> ClientResult<CompatibilitySetting> {
        let state = self.enter(
            Call::GetCompatibility(subject.to_string()),
            Operation::GetCompatibility,
            Some(subject),
        )?;
        Ok(state
            .subject_compatibility
            .get(subject)
            .map(|level| CompatibilitySetting::Explicit(*level))
            .unwrap_or(CompatibilitySetting::InheritsGlobal))
    }

    fn set_compatibility(&self, subject: &str, level: Compatibility) -> ClientResult<()> {
        let mut state = self.enter(
            Call::SetCompatibility(subject.to_string(), level),
            Operation::SetCompatibility,
            Some(subject),
        )?;
        state.subject_compatibility.insert(subject.to_string(), level);
        Ok(())
    }

    fn delete_compatibility(&self, subject: &str) -> ClientResult<()> {
        let mut state = self.enter(
            Call::DeleteCompatibility(subject.to_string()),
            Operation::DeleteCompatibility,
            Some(subject),
        )?;
        match state.subject_compatibility.remove(subject) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound(format!(
                "Subject '{}' does not have subject-level compatibility configured",
                subject
            ))),
        }
    }

    fn delete_subject(&self, subject: &str, permanent: bool) -> ClientResult<Vec<u32>> {
        let mut state = self.enter(
            Call::DeleteSubject(subject.to_string(), permanent),
            Operation::DeleteSubject,
            Some(subject),
        )?;

        let mut removed = Vec::new();
        if let Some(pos) = state.subjects.iter().position(|(n, _)| n == subject) {
            let entry = state.subjects.remove(pos);
            removed = entry.1.iter().map(|v| v.version).collect();
            state.soft_deleted.push(entry);
        }

        if permanent {
            if let Some(pos) = state.soft_deleted.iter().position(|(n, _)| n == subject) {
                let (_, versions) = state.soft_deleted.remove(pos);
                if removed.is_empty() {
                    removed = versions.iter().map(|v| v.version).collect();
                }
                // Ids stay bound while any live or soft-deleted version still uses the content
                for version in versions {
                    let checksum = version.checksum();
                    let still_used = state
                        .subjects
                        .iter()
                        .chain(state.soft_deleted.iter())
                        .flat_map(|(_, v)| v.iter())
                        .any(|v| v.checksum() == checksum);
                    if !still_used {
                        state.ids_by_content.remove(&checksum);
                        state.content_by_id.remove(&version.id);
                    }
                }
            }
            state.subject_modes.remove(subject);
            state.subject_compatibility.remove(subject);
        }

        if removed.is_empty() {
            Err(RegistryError::NotFound(format!("Subject '{}' not found.", subject)))
        } else {
            Ok(removed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"}]}"#;
    const V2_COMPATIBLE: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"int"},{"name":"b","type":"string","default":""}]}"#;
    const V2_BREAKING: &str = r#"{"type":"record","name":"Order","fields":[{"name":"a","type":"string"}]}"#;

    #[test]
    fn test_register_assigns_ids_and_versions() {
        let registry = InMemoryRegistry::new("test");
        let first = registry.register_schema("orders", SchemaType::Avro, V1, None).unwrap();
        let second = registry.register_schema("orders", SchemaType::Avro, V2_COMPATIBLE, None).unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(registry.list_versions("orders").unwrap(), vec![1, 2]);

        // Identical content reuses its id, in the same or another subject
        assert_eq!(registry.register_schema("orders", SchemaType::Avro, V1, None).unwrap(), 1);
        assert_eq!(registry.register_schema("payments", SchemaType::Avro, V1, None).unwrap(), 1);
        assert_eq!(registry.list_versions("orders").unwrap().len(), 2);
    }

    #[test]
    fn test_incompatible_schema_is_a_conflict() {
        let registry = InMemoryRegistry::new("test");
        registry.register_schema("orders", SchemaType::Avro, V1, None).unwrap();

        let err = registry.register_schema("orders", SchemaType::Avro, V2_BREAKING, None).unwrap_err();
        assert!(err.is_conflict());

        registry.set_compatibility("orders", Compatibility::None).unwrap();
        assert!(registry.register_schema("orders", SchemaType::Avro, V2_BREAKING, None).is_ok());
    }

    #[test]
    fn test_import_mode_rules() {
        let registry = InMemoryRegistry::new("test");

        let err = registry.register_schema("orders", SchemaType::Avro, V1, Some(10)).unwrap_err();
        assert!(matches!(err, RegistryError::WriteRejected { .. }));

        registry.set_mode("orders", Mode::Import).unwrap();
        assert_eq!(registry.register_schema("orders", SchemaType::Avro, V1, Some(10)).unwrap(), 10);

        // Id 10 is now bound to V1
        registry.set_mode("payments", Mode::Import).unwrap();
        let err = registry.register_schema("payments", SchemaType::Avro, V2_BREAKING, Some(10)).unwrap_err();
        assert!(matches!(err, RegistryError::WriteRejected { code: Some(42207), .. }));

        // IMPORT cannot be entered on a subject that already has versions
        registry.set_mode("orders", Mode::ReadWrite).unwrap();
        assert!(registry.set_mode("orders", Mode::Import).is_err());

        // Fresh ids continue after imported ones
        assert_eq!(registry.register_schema("orders", SchemaType::Avro, V2_COMPATIBLE, None).unwrap(), 11);
    }

    #[test]
    fn test_read_only_subject_rejects_writes() {
        let registry = InMemoryRegistry::new("test");
        registry.set_mode("orders", Mode::ReadOnly).unwrap();
        let err = registry.register_schema("orders", SchemaType::Avro, V1, None).unwrap_err();
        assert!(matches!(err, RegistryError::WriteRejected { .. }));
    }

    #[test]
    fn test_compatibility_override_round_trip() {
        let registry = InMemoryRegistry::new("test");
        assert_eq!(registry.get_compatibility("orders").unwrap(), CompatibilitySetting::InheritsGlobal);
        registry.set_compatibility("orders", Compatibility::Full).unwrap();
        assert_eq!(
            registry.get_compatibility("orders").unwrap(),
            CompatibilitySetting::Explicit(Compatibility::Full)
        );
        registry.delete_compatibility("orders").unwrap();
        assert_eq!(registry.subject_compatibility("orders"), None);
    }

    #[test]
    fn test_subject_mode_override() {
        let registry = InMemoryRegistry::new("test");
        registry.set_global_mode(Mode::Import).unwrap();
        assert_eq!(registry.get_mode("orders").unwrap(), Mode::Import);
        assert_eq!(registry.get_subject_mode("orders").unwrap(), None);

        registry.set_mode("orders", Mode::ReadWrite).unwrap();
        assert_eq!(registry.get_subject_mode("orders").unwrap(), Some(Mode::ReadWrite));
        registry.delete_mode("orders").unwrap();
        assert_eq!(registry.get_mode("orders").unwrap(), Mode::Import);
        assert!(registry.delete_mode("orders").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_subject() {
        let registry = InMemoryRegistry::new("test");
        registry.seed_subject("orders", &[(5, V1), (6, V2_COMPATIBLE)]);

        assert_eq!(registry.delete_subject("orders", false).unwrap(), vec![1, 2]);
        assert!(registry.list_subjects().unwrap().is_empty());
        assert_eq!(registry.delete_subject("orders", true).unwrap(), vec![1, 2]);
        assert!(registry.delete_subject("orders", true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let registry = InMemoryRegistry::new("test");
        registry.fail_next(Operation::GetMode, Some("orders"), RegistryError::Transport("boom".into()));

        assert!(registry.get_mode("payments").is_ok());
        assert!(registry.get_mode("orders").is_err());
        assert!(registry.get_mode("orders").is_ok());
        assert_eq!(registry.calls().len(), 3);
    }
}
