//! Content fingerprints used to recognise byte-identical schemas

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 fingerprint of raw schema content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from schema text, byte-for-byte
    pub fn from_str(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
