//! JSON Schema trees and reader/writer resolution
//!
//! A reader can read a writer when every document valid under the writer is
//! valid under the reader. Only the structural keywords that matter for that
//! question are kept: types, properties, required, additionalProperties,
//! items, enum/const, anyOf/oneOf and local `$ref`s.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::compatibility::{Incompatibility, IncompatibilityKind};
use crate::error::{Result, SchemaError};

#[derive(Debug, Clone, PartialEq)]
pub enum JsonType {
    /// Accepts every document (`true` or `{}`)
    Any,
    /// Accepts nothing (`false`)
    Nothing,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array(Box<JsonType>),
    Object(ObjectType),
    Enum(Vec<Value>),
    Union(Vec<JsonType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub properties: BTreeMap<String, Property>,
    pub required: BTreeSet<String>,
    /// `false` only when `additionalProperties: false`
    pub additional_properties: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub ty: JsonType,
    pub default: Option<Value>,
}

/// A parsed JSON Schema document
#[derive(Debug, Clone)]
pub struct JsonSchema {
    root: JsonType,
}

impl JsonSchema {
    pub fn parse(document: &Value) -> Result<Self> {
        let mut parser = Parser {
            document,
            resolving: Vec::new(),
        };
        Ok(Self {
            root: parser.parse(document)?,
        })
    }

    pub fn root(&self) -> &JsonType {
        &self.root
    }

    /// Whether every document valid under `writer` is valid under `self`
    pub fn can_read(&self, writer: &JsonSchema) -> std::result::Result<(), Incompatibility> {
        resolve(&self.root, &writer.root, "")
    }
}

fn invalid(message: impl Into<String>) -> SchemaError {
    SchemaError::InvalidSchema(message.into())
}

struct Parser<'a> {
    document: &'a Value,
    /// `$ref`s currently being expanded
    resolving: Vec<String>,
}

impl Parser<'_> {
    fn parse(&mut self, value: &Value) -> Result<JsonType> {
        match value {
            Value::Bool(true) => Ok(JsonType::Any),
            Value::Bool(false) => Ok(JsonType::Nothing),
            Value::Object(obj) => self.parse_object(obj),
            other => Err(invalid(format!("unexpected schema element: {}", other))),
        }
    }

    fn parse_object(&mut self, obj: &Map<String, Value>) -> Result<JsonType> {
        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return self.parse_ref(reference);
        }
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            return Ok(JsonType::Enum(values.clone()));
        }
        if let Some(value) = obj.get("const") {
            return Ok(JsonType::Enum(vec![value.clone()]));
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(branches) = obj.get(keyword).and_then(Value::as_array) {
                let branches = branches.iter().map(|b| self.parse(b)).collect::<Result<Vec<_>>>()?;
                return Ok(JsonType::Union(branches));
            }
        }

        match obj.get("type") {
            Some(Value::String(name)) => self.parse_typed(name, obj),
            Some(Value::Array(names)) => {
                let branches = names
                    .iter()
                    .map(|name| {
                        let name = name.as_str().ok_or_else(|| invalid("'type' entries must be strings"))?;
                        self.parse_typed(name, obj)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(JsonType::Union(branches))
            }
            Some(other) => Err(invalid(format!("invalid 'type': {}", other))),
            None if obj.contains_key("properties") => self.parse_typed("object", obj),
            None if obj.contains_key("items") => self.parse_typed("array", obj),
            None => Ok(JsonType::Any),
        }
    }

    fn parse_typed(&mut self, name: &str, obj: &Map<String, Value>) -> Result<JsonType> {
        Ok(match name {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "array" => {
                let items = match obj.get("items") {
                    None => JsonType::Any,
                    Some(Value::Array(tuple)) => {
                        JsonType::Union(tuple.iter().map(|item| self.parse(item)).collect::<Result<Vec<_>>>()?)
                    }
                    Some(items) => self.parse(items)?,
                };
                JsonType::Array(Box::new(items))
            }
            "object" => {
                let mut properties = BTreeMap::new();
                if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                    for (prop, schema) in props {
                        properties.insert(
                            prop.clone(),
                            Property {
                                ty: self.parse(schema)?,
                                default: schema.get("default").cloned(),
                            },
                        );
                    }
                }
                let required = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|names| names.iter().filter_map(Value::as_str).map(String::from).collect())
                    .unwrap_or_default();
                JsonType::Object(ObjectType {
                    properties,
                    required,
                    additional_properties: !matches!(obj.get("additionalProperties"), Some(Value::Bool(false))),
                })
            }
            other => return Err(invalid(format!("unknown JSON Schema type '{}'", other))),
        })
    }

    fn parse_ref(&mut self, reference: &str) -> Result<JsonType> {
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| invalid(format!("only local references are supported: '{}'", reference)))?;
        // Recursive structures are compared up to the first repetition.
        if self.resolving.iter().any(|r| r == reference) {
            return Ok(JsonType::Any);
        }
        let target = self
            .document
            .pointer(pointer)
            .ok_or_else(|| invalid(format!("unresolvable reference '{}'", reference)))?;
        self.resolving.push(reference.to_string());
        let parsed = self.parse(target);
        self.resolving.pop();
        parsed
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn describe(ty: &JsonType) -> &'static str {
    match ty {
        JsonType::Any => "any",
        JsonType::Nothing => "nothing",
        JsonType::Null => "null",
        JsonType::Boolean => "boolean",
        JsonType::Integer => "integer",
        JsonType::Number => "number",
        JsonType::String => "string",
        JsonType::Array(_) => "array",
        JsonType::Object(_) => "object",
        JsonType::Enum(_) => "enum",
        JsonType::Union(_) => "union",
    }
}

/// Whether a literal value is accepted by `ty`
fn accepts(ty: &JsonType, value: &Value) -> bool {
    match (ty, value) {
        (JsonType::Any, _) => true,
        (JsonType::Nothing, _) => false,
        (JsonType::Null, Value::Null) => true,
        (JsonType::Boolean, Value::Bool(_)) => true,
        (JsonType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (JsonType::Number, Value::Number(_)) => true,
        (JsonType::String, Value::String(_)) => true,
        (JsonType::Array(items), Value::Array(values)) => values.iter().all(|v| accepts(items, v)),
        (JsonType::Object(_), Value::Object(_)) => true,
        (JsonType::Enum(values), v) => values.contains(v),
        (JsonType::Union(branches), v) => branches.iter().any(|b| accepts(b, v)),
        _ => false,
    }
}

fn resolve(reader: &JsonType, writer: &JsonType, path: &str) -> std::result::Result<(), Incompatibility> {
    use JsonType::*;

    match (reader, writer) {
        (Any, _) | (_, Nothing) => Ok(()),
        (_, Union(branches)) => {
            for branch in branches {
                resolve(reader, branch, path)?;
            }
            Ok(())
        }
        (Union(branches), _) => {
            if branches.iter().any(|b| resolve(b, writer, path).is_ok()) {
                Ok(())
            } else {
                Err(Incompatibility::new(
                    IncompatibilityKind::MissingUnionBranch,
                    display_path(path),
                    format!("no reader branch accepts writer type {}", describe(writer)),
                ))
            }
        }
        (Enum(accepted), Enum(written)) => match written.iter().find(|v| !accepted.contains(v)) {
            Some(missing) => Err(Incompatibility::new(
                IncompatibilityKind::MissingEnumSymbol,
                display_path(path),
                format!("reader enum lacks writer value {}", missing),
            )),
            None => Ok(()),
        },
        (_, Enum(written)) => match written.iter().find(|v| !accepts(reader, v)) {
            Some(rejected) => Err(Incompatibility::new(
                IncompatibilityKind::TypeMismatch,
                display_path(path),
                format!("reader type {} rejects writer value {}", describe(reader), rejected),
            )),
            None => Ok(()),
        },
        (Null, Null) | (Boolean, Boolean) | (Integer, Integer) | (Number, Number) | (String, String) => Ok(()),
        (Number, Integer) => Ok(()),
        (Array(r), Array(w)) => resolve(r, w, &format!("{}/items", path)),
        (Object(r), Object(w)) => resolve_object(r, w, path),
        _ => Err(Incompatibility::new(
            IncompatibilityKind::TypeMismatch,
            display_path(path),
            format!("reader type {} cannot read writer type {}", describe(reader), describe(writer)),
        )),
    }
}

fn resolve_object(reader: &ObjectType, writer: &ObjectType, path: &str) -> std::result::Result<(), Incompatibility> {
    for (name, property) in &reader.properties {
        let property_path = format!("{}/{}", path, name);
        if let Some(written) = writer.properties.get(name) {
            resolve(&property.ty, &written.ty, &property_path)?;
        }
        if reader.required.contains(name) && !writer.required.contains(name) && property.default.is_none() {
            return Err(Incompatibility::new(
                IncompatibilityKind::RequiredPropertyAdded,
                property_path,
                format!("property '{}' is required by the reader but not guaranteed by the writer", name),
            ));
        }
    }

    for name in reader.required.difference(&writer.required) {
        if !reader.properties.contains_key(name) {
            return Err(Incompatibility::new(
                IncompatibilityKind::RequiredPropertyAdded,
                format!("{}/{}", path, name),
                format!("property '{}' is required by the reader but not guaranteed by the writer", name),
            ));
        }
    }

    if !reader.additional_properties {
        if let Some(name) = writer.properties.keys().find(|name| !reader.properties.contains_key(*name)) {
            return Err(Incompatibility::new(
                IncompatibilityKind::PropertyNotAllowed,
                format!("{}/{}", path, name),
                format!("writer property '{}' is not allowed by the reader", name),
            ));
        }
        if writer.additional_properties {
            return Err(Incompatibility::new(
                IncompatibilityKind::PropertyNotAllowed,
                display_path(path),
                "writer allows additional properties the reader rejects",
            ));
        }
    }

    Ok(())
}
