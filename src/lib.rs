//! Schema Registry Migrator
//!
//! Copies subjects and schema versions from one Confluent-compatible schema
//! registry to another, keeping version order and, when asked, the original
//! global schema ids.
//!
//! ## Features
//!
//! - **ID Collision Gating**: Nothing is written while the same id names different content on both sides
//! - **ID Preservation**: Empty destination subjects are filled in IMPORT mode with the source ids
//! - **Scoped Mode Changes**: Subject and global modes are restored on every exit path
//! - **Compatibility Retry**: Incompatible versions are retried with compatibility NONE, then the setting is restored
//! - **Dry Run**: Compatibility checks only, no writes
//!
//! ## Flow
//!
//! ```text
//! source ──┐
//!          ├─ snapshot ─ compare ─ gate ─ cleanup ─ engine pass ─ retry pass ─ report
//! dest ────┘
//! ```

pub mod checksum;
pub mod client;
pub mod compare;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod migrator;
pub mod mode;
pub mod report;
pub mod retry;
pub mod schema;
pub mod snapshot;

pub use checksum::Checksum;
pub use client::{HttpRegistryClient, InMemoryRegistry, RegistryClient};
pub use compare::{compare, Comparison, IdCollision};
pub use config::MigratorConfig;
pub use diff::SchemaDiff;
pub use engine::{MigrationEngine, MigrationUnit, UnitStatus};
pub use error::{MigrationError, RegistryError, Result};
pub use migrator::{Cleanup, MigrationSettings, Migrator};
pub use mode::{ModeManager, StateWarning};
pub use report::MigrationReport;
pub use retry::RetryCoordinator;
pub use schema::{Compatibility, CompatibilitySetting, Mode, SchemaType, SchemaVersion, Subject};
pub use snapshot::RegistrySnapshot;
