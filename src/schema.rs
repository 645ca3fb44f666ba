//! Schema types and structures shared by every migration phase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checksum::Checksum;

/// Type of schema, as reported by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    /// Registries omit `schemaType` for Avro, so it is the default
    #[default]
    Avro,
    Json,
    Protobuf,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
        }
    }

    /// Whether the raw content of this type is a JSON document
    pub fn is_json_encoded(&self) -> bool {
        matches!(self, SchemaType::Avro | SchemaType::Json)
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered version of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub subject: String,
    /// Per-subject revision number, starting at 1
    pub version: u32,
    /// Registry-wide id of this exact content
    pub id: u32,
    #[serde(default)]
    pub schema_type: SchemaType,
    /// Raw schema text, migrated byte-for-byte
    pub schema: String,
}

impl SchemaVersion {
    pub fn new(
        subject: impl Into<String>,
        version: u32,
        id: u32,
        schema_type: SchemaType,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            version,
            id,
            schema_type,
            schema: schema.into(),
        }
    }

    /// Fingerprint of the raw content
    pub fn checksum(&self) -> Checksum {
        Checksum::from_str(&self.schema)
    }

    /// Byte-identical content check
    pub fn same_content(&self, other: &SchemaVersion) -> bool {
        self.schema == other.schema
    }

    /// Get a unique key for this version (e.g. "orders/v3")
    pub fn key(&self) -> String {
        format!("{}/v{}", self.subject, self.version)
    }
}

/// Registry mode, per subject or global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[serde(rename = "READWRITE")]
    ReadWrite,
    #[serde(rename = "READONLY")]
    ReadOnly,
    #[serde(rename = "READONLY_OVERRIDE")]
    ReadOnlyOverride,
    Import,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ReadWrite => "READWRITE",
            Mode::ReadOnly => "READONLY",
            Mode::ReadOnlyOverride => "READONLY_OVERRIDE",
            Mode::Import => "IMPORT",
        }
    }

    /// Whether new versions can be registered without specifying an id
    pub fn accepts_new_versions(&self) -> bool {
        matches!(self, Mode::ReadWrite)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READWRITE" => Ok(Mode::ReadWrite),
            "READONLY" => Ok(Mode::ReadOnly),
            "READONLY_OVERRIDE" => Ok(Mode::ReadOnlyOverride),
            "IMPORT" => Ok(Mode::Import),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Compatibility level enforced when a new version is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compatibility {
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
    None,
}

impl Compatibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compatibility::Backward => "BACKWARD",
            Compatibility::BackwardTransitive => "BACKWARD_TRANSITIVE",
            Compatibility::Forward => "FORWARD",
            Compatibility::ForwardTransitive => "FORWARD_TRANSITIVE",
            Compatibility::Full => "FULL",
            Compatibility::FullTransitive => "FULL_TRANSITIVE",
            Compatibility::None => "NONE",
        }
    }
}

impl fmt::Display for Compatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject-level compatibility: an explicit override or the global default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatibilitySetting {
    Explicit(Compatibility),
    InheritsGlobal,
}

impl fmt::Display for CompatibilitySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompatibilitySetting::Explicit(level) => write!(f, "{}", level),
            CompatibilitySetting::InheritsGlobal => f.write_str("(inherits global)"),
        }
    }
}

/// A subject and its versions, sorted ascending by version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub versions: Vec<SchemaVersion>,
    /// Only populated when the snapshot was asked to read subject config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatibilitySetting>,
}

impl Subject {
    /// Create a subject, sorting its versions ascending
    pub fn new(name: impl Into<String>, mut versions: Vec<SchemaVersion>) -> Self {
        versions.sort_by_key(|v| v.version);
        Self {
            name: name.into(),
            versions,
            mode: None,
            compatibility: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn get_version(&self, version: u32) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Find any version holding byte-identical content
    pub fn find_content(&self, schema: &str) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.schema == schema)
    }

    pub fn latest(&self) -> Option<&SchemaVersion> {
        self.versions.last()
    }
}
