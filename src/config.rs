//! Configuration management for the migrator
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (migrator.toml)
//! - Environment variables (MIGRATOR_*, `__` separates sections)
//!
//! ## Example config file (migrator.toml):
//! ```toml
//! [source]
//! url = "https://source-registry:8081"
//! username = "svc-reader"
//! password = "..."
//!
//! [destination]
//! url = "https://dest-registry:8082"
//! context = "migrated"
//!
//! [migration]
//! enabled = true
//! dry_run = false
//! preserve_ids = true
//! auto_compatibility = true
//! mode_after_migration = "READONLY"
//! ```
//!
//! The same settings from the environment:
//! `MIGRATOR_SOURCE__URL`, `MIGRATOR_MIGRATION__PRESERVE_IDS=true`,
//! `MIGRATOR_MIGRATION__CLEANUP_SUBJECTS=orders-value,payments-value`.

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::migrator::{Cleanup, MigrationSettings};
use crate::schema::Mode;

pub const DEFAULT_SOURCE_URL: &str = "http://localhost:8081";
pub const DEFAULT_DESTINATION_URL: &str = "http://localhost:8082";

/// Main configuration for a migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Registry schemas are read from
    #[serde(default = "default_source")]
    pub source: RegistryEndpoint,

    /// Registry schemas are written to
    #[serde(default = "default_destination")]
    pub destination: RegistryEndpoint,

    /// Migration toggles
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Connection settings for one registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Base URL of the registry REST API
    pub url: String,

    /// Basic-auth user; must be set together with `password`
    #[serde(default)]
    pub username: Option<String>,

    /// Never written back when the configuration is saved
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Schema context, addressed as `/contexts/{context}/...`
    #[serde(default)]
    pub context: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Migration toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Without this, a run only compares the registries
    #[serde(default)]
    pub enabled: bool,

    /// Read and check compatibility only, never write
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Keep source schema ids (requires IMPORT mode on empty destination subjects)
    #[serde(default)]
    pub preserve_ids: bool,

    /// Delete every destination subject before migrating
    #[serde(default)]
    pub cleanup_destination: bool,

    /// Delete only these destination subjects before migrating
    #[serde(default)]
    pub cleanup_subjects: Vec<String>,

    /// Hard-delete during cleanup instead of soft-delete
    #[serde(default)]
    pub permanent_delete: bool,

    /// Retry incompatible versions with compatibility temporarily set to NONE
    #[serde(default)]
    pub auto_compatibility: bool,

    /// Put the whole destination registry in IMPORT mode while migrating
    #[serde(default)]
    pub global_import_mode: bool,

    /// Global mode to leave the destination in once migration finishes
    #[serde(default)]
    pub mode_after_migration: Option<Mode>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_source() -> RegistryEndpoint {
    RegistryEndpoint {
        url: DEFAULT_SOURCE_URL.to_string(),
        ..RegistryEndpoint::default()
    }
}

fn default_destination() -> RegistryEndpoint {
    RegistryEndpoint {
        url: DEFAULT_DESTINATION_URL.to_string(),
        ..RegistryEndpoint::default()
    }
}

impl Default for RegistryEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            username: None,
            password: None,
            context: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            preserve_ids: false,
            cleanup_destination: false,
            cleanup_subjects: Vec::new(),
            permanent_delete: false,
            auto_compatibility: false,
            global_import_mode: false,
            mode_after_migration: None,
        }
    }
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            destination: default_destination(),
            migration: MigrationConfig::default(),
        }
    }
}

impl RegistryEndpoint {
    /// Reject inconsistent settings before any network call
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(MigrationError::Validation("registry URL must not be empty".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(MigrationError::Validation(format!(
                "both username and password must be provided for {}, or neither",
                self.url
            )));
        }
        Ok(())
    }
}

/// `MIGRATOR_` prefix, `__` between section and key
fn environment() -> Environment {
    Environment::with_prefix("MIGRATOR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("migration.cleanup_subjects")
}

impl MigratorConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        Self::load_layered(config_path, environment())
    }

    fn load_layered(config_path: Option<&str>, env: Environment) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("source.url", DEFAULT_SOURCE_URL)?
            .set_default("destination.url", DEFAULT_DESTINATION_URL)?;

        let config_locations = [
            "migrator.toml",
            ".migrator.toml",
            "config/migrator.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "schema-tools", "registry-migrator") {
            let xdg_config = config_dir.config_dir().join("migrator.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(env);

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file (passwords are left out)
    pub fn save(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check both endpoints and the migration toggles
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        self.destination.validate()?;
        if self.migration.cleanup_destination && !self.migration.cleanup_subjects.is_empty() {
            return Err(MigrationError::Validation(
                "cleanup_destination and cleanup_subjects are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Toggles in the form the orchestrator consumes
    pub fn settings(&self) -> MigrationSettings {
        let m = &self.migration;
        let cleanup = if m.cleanup_destination {
            Cleanup::All
        } else if !m.cleanup_subjects.is_empty() {
            Cleanup::Subjects(m.cleanup_subjects.clone())
        } else {
            Cleanup::None
        };
        MigrationSettings {
            enabled: m.enabled,
            dry_run: m.dry_run,
            preserve_ids: m.preserve_ids,
            cleanup,
            permanent_delete: m.permanent_delete,
            auto_compatibility: m.auto_compatibility,
            global_import_mode: m.global_import_mode,
            mode_after_migration: m.mode_after_migration,
        }
    }
}
