//! Registry clients
//!
//! Everything the migrator needs from a registry goes through [`RegistryClient`].
//! Two implementations ship with the crate: [`HttpRegistryClient`] for
//! Confluent-compatible REST endpoints and [`InMemoryRegistry`] for tests and
//! local experiments.

mod http;
mod memory;

pub use http::HttpRegistryClient;
pub use memory::{Call, InMemoryRegistry, Operation};

use crate::error::RegistryError;
use crate::schema::{Compatibility, CompatibilitySetting, Mode, SchemaType, SchemaVersion};

/// Result type for a single registry call
pub type ClientResult<T> = std::result::Result<T, RegistryError>;

/// Read/write primitives against one schema registry.
///
/// Calls block until the registry answers. Implementations are used from a
/// single thread and one call is in flight at a time.
pub trait RegistryClient {
    /// Short human-readable name for log lines (usually the base URL)
    fn describe(&self) -> String;

    /// All subjects, in the order the registry returns them
    fn list_subjects(&self) -> ClientResult<Vec<String>>;

    fn list_versions(&self, subject: &str) -> ClientResult<Vec<u32>>;

    fn get_version(&self, subject: &str, version: u32) -> ClientResult<SchemaVersion>;

    /// Register `schema` under `subject` and return the id the registry assigned.
    /// Passing `id` asks the registry to keep that id, which requires IMPORT mode.
    fn register_schema(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
        id: Option<u32>,
    ) -> ClientResult<u32>;

    /// Read-only compatibility test against the subject's latest version.
    /// A subject that does not exist yet is compatible with anything.
    fn check_compatibility(
        &self,
        subject: &str,
        schema_type: SchemaType,
        schema: &str,
    ) -> ClientResult<bool>;

    /// Effective mode of a subject, falling back to the global mode
    fn get_mode(&self, subject: &str) -> ClientResult<Mode>;

    fn set_mode(&self, subject: &str, mode: Mode) -> ClientResult<()>;

    /// Subject-level mode override, `None` when the subject follows the global mode
    fn get_subject_mode(&self, subject: &str) -> ClientResult<Option<Mode>>;

    /// Remove the subject-level mode override
    fn delete_mode(&self, subject: &str) -> ClientResult<()>;

    fn get_global_mode(&self) -> ClientResult<Mode>;

    fn set_global_mode(&self, mode: Mode) -> ClientResult<()>;

    fn get_compatibility(&self, subject: &str) -> ClientResult<CompatibilitySetting>;

    fn set_compatibility(&self, subject: &str, level: Compatibility) -> ClientResult<()>;

    /// Remove the subject-level override so the global setting applies again
    fn delete_compatibility(&self, subject: &str) -> ClientResult<()>;

    /// Delete a subject and return the versions that were removed
    fn delete_subject(&self, subject: &str, permanent: bool) -> ClientResult<Vec<u32>>;
}
