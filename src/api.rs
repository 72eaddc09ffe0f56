//! Wire representations of registry requests and responses
//!
//! Field names follow the Confluent Schema Registry REST API so that output
//! of the CLI can be fed to tooling written against it.

use serde::{Deserialize, Serialize};

use crate::compatibility::{CompatibilityMode, CompatibilityResult};
use crate::error::SchemaError;
use crate::registry::{Registration, SubjectSchema};
use crate::schema::{Schema, SchemaFormat};
use crate::store::SchemaId;
use crate::version::VersionNumber;

/// Body of a registration or compatibility-check request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSchemaRequest {
    pub schema: String,
    #[serde(default)]
    pub schema_type: SchemaFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSchemaResponse {
    pub id: SchemaId,
}

impl From<Registration> for RegisterSchemaResponse {
    fn from(registration: Registration) -> Self {
        Self { id: registration.id }
    }
}

/// A subject version with its schema text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectVersionResponse {
    /// Subject name
    pub name: String,
    pub version: VersionNumber,
    pub id: SchemaId,
    pub schema: String,
    pub schema_type: SchemaFormat,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl From<SubjectSchema> for SubjectVersionResponse {
    fn from(found: SubjectSchema) -> Self {
        Self {
            name: found.subject,
            version: found.version,
            id: found.id,
            schema: found.schema.raw().to_string(),
            schema_type: found.schema.format(),
            deleted: found.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaResponse {
    pub schema: String,
    pub schema_type: SchemaFormat,
}

impl From<&Schema> for SchemaResponse {
    fn from(schema: &Schema) -> Self {
        Self {
            schema: schema.raw().to_string(),
            schema_type: schema.format(),
        }
    }
}

/// A (subject, version) pair referencing a schema id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectVersionRef {
    pub subject: String,
    pub version: VersionNumber,
}

/// Reading a compatibility setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub compatibility_level: CompatibilityMode,
}

/// Writing a compatibility setting, and the echo of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub compatibility: CompatibilityMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityCheckResponse {
    pub is_compatible: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

impl CompatibilityCheckResponse {
    /// Messages are only reported when `verbose` is requested
    pub fn from_result(result: CompatibilityResult, verbose: bool) -> Self {
        Self {
            is_compatible: result.is_compatible,
            messages: if verbose { result.messages } else { Vec::new() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: u32,
    pub message: String,
}

impl From<&SchemaError> for ErrorResponse {
    fn from(err: &SchemaError) -> Self {
        Self {
            error_code: err.error_code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_request_defaults_to_avro() {
        let request: RegisterSchemaRequest = serde_json::from_value(json!({"schema": "\"string\""})).unwrap();
        assert_eq!(request.schema_type, SchemaFormat::Avro);

        let request: RegisterSchemaRequest =
            serde_json::from_value(json!({"schema": "{}", "schemaType": "JSON"})).unwrap();
        assert_eq!(request.schema_type, SchemaFormat::Json);
    }

    #[test]
    fn test_config_field_names() {
        let read = serde_json::to_value(ConfigResponse {
            compatibility_level: CompatibilityMode::BackwardTransitive,
        })
        .unwrap();
        assert_eq!(read, json!({"compatibilityLevel": "BACKWARD_TRANSITIVE"}));

        let update: ConfigUpdate = serde_json::from_value(json!({"compatibility": "FULL"})).unwrap();
        assert_eq!(update.compatibility, CompatibilityMode::Full);
    }

    #[test]
    fn test_error_response() {
        let err = SchemaError::SubjectNotFound { subject: "t".into() };
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body, json!({"error_code": 40401, "message": "Subject 't' not found."}));
    }

    #[test]
    fn test_check_response_hides_messages_unless_verbose() {
        let result = CompatibilityResult {
            is_compatible: false,
            messages: vec!["reader field 'f2' has no default".into()],
            incompatibility: None,
        };
        let quiet = CompatibilityCheckResponse::from_result(result.clone(), false);
        assert_eq!(serde_json::to_value(&quiet).unwrap(), json!({"is_compatible": false}));
        let verbose = CompatibilityCheckResponse::from_result(result, true);
        assert_eq!(verbose.messages.len(), 1);
    }
}
