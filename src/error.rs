//! Error types for the migrator

use thiserror::Error;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors returned by a single registry call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry refused the schema as incompatible with the subject's history (409)
    #[error("Incompatible schema: {message}")]
    Conflict { message: String },

    /// The subject is not writable or the mode transition is illegal (422)
    #[error("Write rejected (error code {code:?}): {message}")]
    WriteRejected { code: Option<i64>, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or any other non-success status
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid registry response: {0}")]
    InvalidResponse(String),
}

impl RegistryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RegistryError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// Migration errors
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Inconsistent configuration, detected before any network call
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// ID collisions exist and destination cleanup does not cover them
    #[error("{count} schema ID collision(s) between source and destination; migration cannot proceed")]
    Precondition { count: usize },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}
