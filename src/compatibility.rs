//! Schema compatibility checking
//!
//! Decides whether a candidate schema may follow a subject's history under a
//! given compatibility mode. Pairwise reader/writer resolution is delegated to
//! the format modules by matching on [`ParsedSchema`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::schema::ParsedSchema;

/// Compatibility policy for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// No checks at all
    #[default]
    None,
    /// The new schema can read data written with the latest schema
    Backward,
    /// The new schema can read data written with every earlier schema
    BackwardTransitive,
    /// The latest schema can read data written with the new schema
    Forward,
    /// Every earlier schema can read data written with the new schema
    ForwardTransitive,
    /// Backward and forward against the latest schema
    Full,
    /// Backward and forward against every earlier schema
    FullTransitive,
}

impl CompatibilityMode {
    pub const ALL: [CompatibilityMode; 7] = [
        CompatibilityMode::None,
        CompatibilityMode::Backward,
        CompatibilityMode::BackwardTransitive,
        CompatibilityMode::Forward,
        CompatibilityMode::ForwardTransitive,
        CompatibilityMode::Full,
        CompatibilityMode::FullTransitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Compare against every prior version rather than the latest only
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    /// The candidate must read data written with prior schemas
    pub fn checks_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    /// Prior schemas must read data written with the candidate
    pub fn checks_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        CompatibilityMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::InvalidCompatibilityLevel(s.to_string()))
    }
}

/// Category of a single resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompatibilityKind {
    /// Reader expects a field the writer does not produce, and has no default
    MissingDefault,
    /// Reader requires a property the writer leaves optional
    RequiredPropertyAdded,
    /// Writer produces a property a closed reader does not accept
    PropertyNotAllowed,
    /// Value types cannot be resolved
    TypeMismatch,
    /// Named types differ in name
    NameMismatch,
    /// Writer enum symbol unknown to the reader
    MissingEnumSymbol,
    /// Fixed sizes differ
    SizeMismatch,
    /// No reader union branch accepts the writer type
    MissingUnionBranch,
    /// Candidate and prior schema use different formats
    FormatChanged,
}

/// A single reason why a reader cannot read a writer's data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incompatibility {
    pub kind: IncompatibilityKind,
    /// Path to the offending element (e.g. "/myrecord/f2")
    pub path: String,
    pub message: String,
}

impl Incompatibility {
    pub fn new(kind: IncompatibilityKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at '{}': {}", self.kind, self.path, self.message)
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    /// Whether the candidate may be registered
    pub is_compatible: bool,
    /// Human-readable reasons, empty when compatible
    pub messages: Vec<String>,
    /// Structured failure, if any
    pub incompatibility: Option<Incompatibility>,
}

impl CompatibilityResult {
    /// Create a compatible result
    pub fn compatible() -> Self {
        Self {
            is_compatible: true,
            messages: Vec::new(),
            incompatibility: None,
        }
    }

    /// Create an incompatible result
    pub fn incompatible(incompatibility: Incompatibility, context: impl Into<String>) -> Self {
        Self {
            is_compatible: false,
            messages: vec![format!("{}: {}", context.into(), incompatibility)],
            incompatibility: Some(incompatibility),
        }
    }

    /// Summary suitable for an error message
    pub fn reason(&self) -> String {
        self.messages.join("; ")
    }
}

/// A prior schema in a subject's history
#[derive(Debug, Clone)]
pub struct VersionedSchema {
    pub version: u32,
    pub schema: Arc<ParsedSchema>,
}

/// Compatibility checker for a single mode
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityChecker {
    mode: CompatibilityMode,
}

impl CompatibilityChecker {
    pub fn new(mode: CompatibilityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CompatibilityMode {
        self.mode
    }

    /// Check `candidate` against `history` (oldest first).
    ///
    /// Non-transitive modes only look at the last entry. Transitive modes walk
    /// the history in order and stop at the first incompatible version.
    pub fn check(&self, candidate: &ParsedSchema, history: &[VersionedSchema]) -> CompatibilityResult {
        if self.mode == CompatibilityMode::None {
            return CompatibilityResult::compatible();
        }

        let compared: &[VersionedSchema] = if self.mode.is_transitive() {
            history
        } else {
            match history.last() {
                Some(_) => &history[history.len() - 1..],
                None => &[],
            }
        };

        for prior in compared {
            if self.mode.checks_backward() {
                if let Err(reason) = can_read(candidate, &prior.schema) {
                    return CompatibilityResult::incompatible(
                        reason,
                        format!("new schema cannot read data written with version {}", prior.version),
                    );
                }
            }
            if self.mode.checks_forward() {
                if let Err(reason) = can_read(&prior.schema, candidate) {
                    return CompatibilityResult::incompatible(
                        reason,
                        format!("version {} cannot read data written with the new schema", prior.version),
                    );
                }
            }
        }

        CompatibilityResult::compatible()
    }
}

impl Default for CompatibilityChecker {
    fn default() -> Self {
        Self::new(CompatibilityMode::default())
    }
}

/// Whether data written with `writer` can be decoded with `reader`
pub fn can_read(reader: &ParsedSchema, writer: &ParsedSchema) -> std::result::Result<(), Incompatibility> {
    match (reader, writer) {
        (ParsedSchema::Avro(r), ParsedSchema::Avro(w)) => r.can_read(w),
        (ParsedSchema::Json(r), ParsedSchema::Json(w)) => r.can_read(w),
        _ => Err(Incompatibility::new(
            IncompatibilityKind::FormatChanged,
            "/",
            format!("schema format changed from {} to {}", writer.format(), reader.format()),
        )),
    }
}
