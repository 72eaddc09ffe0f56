//! Schema types and structures

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::avro::AvroSchema;
use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};
use crate::json_schema::JsonSchema;

/// Serialization format of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    /// Apache Avro schemas
    #[default]
    Avro,
    /// JSON Schema definitions
    Json,
}

impl SchemaFormat {
    /// Every format this crate can parse and resolve
    pub const ALL: [SchemaFormat; 2] = [SchemaFormat::Avro, SchemaFormat::Json];

    /// Wire name of the format (e.g. "AVRO")
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Json => "JSON",
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaFormat {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaFormat::Avro),
            "JSON" => Ok(SchemaFormat::Json),
            other => Err(SchemaError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A parsed schema tree, tagged by format.
///
/// Compatibility checks dispatch on the variant.
#[derive(Debug, Clone)]
pub enum ParsedSchema {
    Avro(AvroSchema),
    Json(JsonSchema),
}

impl ParsedSchema {
    pub fn format(&self) -> SchemaFormat {
        match self {
            ParsedSchema::Avro(_) => SchemaFormat::Avro,
            ParsedSchema::Json(_) => SchemaFormat::Json,
        }
    }
}

/// An immutable schema value: the submitted text, its canonical form, and
/// the parsed tree used for compatibility checks.
#[derive(Debug, Clone)]
pub struct Schema {
    format: SchemaFormat,
    raw: String,
    canonical: String,
    checksum: Checksum,
    parsed: Arc<ParsedSchema>,
}

impl Schema {
    /// Validate and canonicalize `raw` for `format`
    pub fn new(format: SchemaFormat, raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| SchemaError::InvalidSchema(format!("malformed JSON: {}", e)))?;
        let document = match format {
            SchemaFormat::Avro => collapse_avro_primitives(canonicalize(document)),
            SchemaFormat::Json => canonicalize(document),
        };

        let parsed = match format {
            SchemaFormat::Avro => {
                apache_avro::Schema::parse_str(&raw)
                    .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
                ParsedSchema::Avro(AvroSchema::parse(&document)?)
            }
            SchemaFormat::Json => {
                jsonschema::JSONSchema::compile(&document)
                    .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
                ParsedSchema::Json(JsonSchema::parse(&document)?)
            }
        };

        let canonical = document.to_string();
        let checksum = Checksum::from_json(&document);
        Ok(Self {
            format,
            raw,
            canonical,
            checksum,
            parsed: Arc::new(parsed),
        })
    }

    pub fn format(&self) -> SchemaFormat {
        self.format
    }

    /// The text exactly as it was first submitted
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn parsed(&self) -> &Arc<ParsedSchema> {
        &self.parsed
    }

    /// Content identity: format plus canonical fingerprint
    pub fn content_key(&self) -> ContentKey {
        ContentKey {
            format: self.format,
            checksum: self.checksum.clone(),
        }
    }
}

/// Key under which the Schema Store deduplicates content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub format: SchemaFormat,
    pub checksum: Checksum,
}

/// Normalize a JSON document so that formatting choices do not affect identity.
///
/// Object keys come out sorted (serde_json's default map is ordered), array
/// order is kept, and floats with an integral value collapse to integers so
/// that `1`, `1.0` and `1e0` compare equal.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other,
    }
}

const AVRO_PRIMITIVES: [&str; 8] = ["null", "boolean", "int", "long", "float", "double", "bytes", "string"];

/// Rewrite `{"type": "int"}` and friends to the bare primitive name.
///
/// Only objects whose single attribute is a primitive `type` collapse.
/// Field defaults are data, not schemas, and are left as written.
fn collapse_avro_primitives(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get("type") {
                    if AVRO_PRIMITIVES.contains(&name.as_str()) {
                        return Value::String(name.clone());
                    }
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let v = if k == "default" { v } else { collapse_avro_primitives(v) };
                        (k, v)
                    })
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(collapse_avro_primitives).collect()),
        other => other,
    }
}

fn normalize_number(n: serde_json::Number) -> serde_json::Number {
    if n.is_i64() || n.is_u64() {
        return n;
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            serde_json::Number::from(f as i64)
        }
        _ => n,
    }
}
