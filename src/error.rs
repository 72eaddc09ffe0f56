//! Error types for the schema registry
//!
//! Every variant maps to a stable numeric code so transport layers can branch
//! on the code instead of the message text.

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Subject '{subject}' not found.")]
    SubjectNotFound { subject: String },

    #[error("Subject '{subject}' Version {version} not found.")]
    VersionNotFound { subject: String, version: String },

    #[error("Schema {id} not found")]
    SchemaNotFound { id: u32 },

    #[error("Schema not found under subject '{subject}'")]
    SchemaNotRegistered { subject: String },

    #[error("Subject '{subject}' was soft deleted. Set permanent=true to delete permanently")]
    SubjectSoftDeleted { subject: String },

    #[error("Subject '{subject}' was not deleted first before being permanently deleted")]
    SubjectNotSoftDeleted { subject: String },

    #[error("Subject '{subject}' Version {version} was soft deleted. Set permanent=true to delete permanently")]
    VersionSoftDeleted { subject: String, version: u32 },

    #[error("Subject '{subject}' Version {version} was not deleted first before being permanently deleted")]
    VersionNotSoftDeleted { subject: String, version: u32 },

    #[error("Subject '{subject}' does not have subject-level compatibility configured")]
    SubjectConfigNotFound { subject: String },

    #[error("Schema being registered is incompatible with an earlier schema for subject '{subject}': {reason}")]
    IncompatibleSchema { subject: String, reason: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid compatibility level: {0}")]
    InvalidCompatibilityLevel(String),

    #[error("Unsupported schema format: {0}")]
    UnsupportedFormat(String),

    #[error("Concurrent write conflict on subject '{subject}' after {attempts} attempts")]
    Conflict { subject: String, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// Stable numeric error codes, numbered after the Confluent REST API
pub mod error_codes {
    pub const SUBJECT_NOT_FOUND: u32 = 40401;
    pub const VERSION_NOT_FOUND: u32 = 40402;
    pub const SCHEMA_NOT_FOUND: u32 = 40403;
    pub const SUBJECT_SOFT_DELETED: u32 = 40404;
    pub const SUBJECT_NOT_SOFT_DELETED: u32 = 40405;
    pub const VERSION_SOFT_DELETED: u32 = 40406;
    pub const VERSION_NOT_SOFT_DELETED: u32 = 40407;
    pub const SUBJECT_CONFIG_NOT_FOUND: u32 = 40408;
    pub const INCOMPATIBLE_SCHEMA: u32 = 409;
    pub const INVALID_SCHEMA: u32 = 42201;
    pub const INVALID_VERSION: u32 = 42202;
    pub const INVALID_COMPATIBILITY_LEVEL: u32 = 42203;
    pub const UNSUPPORTED_FORMAT: u32 = 42204;
    pub const STORE_ERROR: u32 = 50001;
    pub const WRITE_CONFLICT: u32 = 50301;
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    IncompatibleSchema,
    InvalidInput,
    Conflict,
    PreconditionFailed,
    Internal,
}

impl SchemaError {
    /// Stable numeric code for this error
    pub fn error_code(&self) -> u32 {
        use error_codes::*;
        match self {
            SchemaError::SubjectNotFound { .. } => SUBJECT_NOT_FOUND,
            SchemaError::VersionNotFound { .. } => VERSION_NOT_FOUND,
            SchemaError::SchemaNotFound { .. } | SchemaError::SchemaNotRegistered { .. } => SCHEMA_NOT_FOUND,
            SchemaError::SubjectSoftDeleted { .. } => SUBJECT_SOFT_DELETED,
            SchemaError::SubjectNotSoftDeleted { .. } => SUBJECT_NOT_SOFT_DELETED,
            SchemaError::VersionSoftDeleted { .. } => VERSION_SOFT_DELETED,
            SchemaError::VersionNotSoftDeleted { .. } => VERSION_NOT_SOFT_DELETED,
            SchemaError::SubjectConfigNotFound { .. } => SUBJECT_CONFIG_NOT_FOUND,
            SchemaError::IncompatibleSchema { .. } => INCOMPATIBLE_SCHEMA,
            SchemaError::InvalidSchema(_) => INVALID_SCHEMA,
            SchemaError::InvalidVersion(_) => INVALID_VERSION,
            SchemaError::InvalidCompatibilityLevel(_) => INVALID_COMPATIBILITY_LEVEL,
            SchemaError::UnsupportedFormat(_) => UNSUPPORTED_FORMAT,
            SchemaError::Conflict { .. } => WRITE_CONFLICT,
            SchemaError::Io(_) | SchemaError::Json(_) | SchemaError::Snapshot(_) => STORE_ERROR,
        }
    }

    /// HTTP status a transport should answer with
    pub fn http_status(&self) -> u16 {
        match self.error_code() {
            code if code >= 10000 => (code / 100) as u16,
            code => code as u16,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::SubjectNotFound { .. }
            | SchemaError::VersionNotFound { .. }
            | SchemaError::SchemaNotFound { .. }
            | SchemaError::SchemaNotRegistered { .. }
            | SchemaError::SubjectSoftDeleted { .. }
            | SchemaError::VersionSoftDeleted { .. }
            | SchemaError::SubjectConfigNotFound { .. } => ErrorKind::NotFound,
            SchemaError::SubjectNotSoftDeleted { .. }
            | SchemaError::VersionNotSoftDeleted { .. } => ErrorKind::PreconditionFailed,
            SchemaError::IncompatibleSchema { .. } => ErrorKind::IncompatibleSchema,
            SchemaError::InvalidSchema(_)
            | SchemaError::InvalidVersion(_)
            | SchemaError::InvalidCompatibilityLevel(_)
            | SchemaError::UnsupportedFormat(_) => ErrorKind::InvalidInput,
            SchemaError::Conflict { .. } => ErrorKind::Conflict,
            SchemaError::Io(_) | SchemaError::Json(_) | SchemaError::Snapshot(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::PreconditionFailed)
    }
}
