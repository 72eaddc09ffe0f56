//! Subject version types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::store::SchemaId;

/// Per-subject version number, starting at 1
pub type VersionNumber = u32;

/// Highest addressable version number (2^31-1)
pub const MAX_VERSION: VersionNumber = i32::MAX as VersionNumber;

/// Addresses a version either by number or as the latest live one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionSelector {
    Latest,
    Number(VersionNumber),
}

impl VersionSelector {
    pub fn number(&self) -> Option<VersionNumber> {
        match self {
            VersionSelector::Latest => None,
            VersionSelector::Number(n) => Some(*n),
        }
    }
}

impl From<VersionNumber> for VersionSelector {
    fn from(n: VersionNumber) -> Self {
        VersionSelector::Number(n)
    }
}

impl FromStr for VersionSelector {
    type Err = SchemaError;

    /// Accepts "latest", "-1" (the Confluent alias for latest) or a positive number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") || s == "-1" {
            return Ok(VersionSelector::Latest);
        }
        match s.parse::<VersionNumber>() {
            Ok(n) if n > 0 && n <= MAX_VERSION => Ok(VersionSelector::Number(n)),
            _ => Err(SchemaError::InvalidVersion(format!(
                "The specified version '{}' is not a valid version id. Allowed values are between [1, 2^31-1] and the string \"latest\"",
                s
            ))),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Lifecycle of a version row: live → soft-deleted → purged.
///
/// Purged rows are removed from the history, so only the first two states
/// are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Live,
    SoftDeleted,
}

/// A (subject, version) → schema id mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectVersion {
    pub subject: String,
    pub version: VersionNumber,
    pub schema_id: SchemaId,
    pub state: VersionState,
    pub registered_at: DateTime<Utc>,
}

impl SubjectVersion {
    pub fn is_deleted(&self) -> bool {
        self.state == VersionState::SoftDeleted
    }
}

impl fmt::Display for SubjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{} (id {})", self.subject, self.version, self.schema_id)
    }
}
