//! Avro schema trees and reader/writer resolution
//!
//! Syntax is checked by `apache-avro` before a document reaches this module;
//! the tree built here only keeps what schema resolution needs.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use crate::compatibility::{Incompatibility, IncompatibilityKind};
use crate::error::{Result, SchemaError};

/// A type position in an Avro schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvroType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<AvroType>),
    Map(Box<AvroType>),
    Union(Vec<AvroType>),
    /// Reference to a named type by full name
    Named(String),
}

impl AvroType {
    fn primitive(name: &str) -> Option<Self> {
        Some(match name {
            "null" => AvroType::Null,
            "boolean" => AvroType::Boolean,
            "int" => AvroType::Int,
            "long" => AvroType::Long,
            "float" => AvroType::Float,
            "double" => AvroType::Double,
            "bytes" => AvroType::Bytes,
            "string" => AvroType::String,
            _ => return None,
        })
    }

    fn describe(&self) -> String {
        match self {
            AvroType::Null => "null".into(),
            AvroType::Boolean => "boolean".into(),
            AvroType::Int => "int".into(),
            AvroType::Long => "long".into(),
            AvroType::Float => "float".into(),
            AvroType::Double => "double".into(),
            AvroType::Bytes => "bytes".into(),
            AvroType::String => "string".into(),
            AvroType::Array(_) => "array".into(),
            AvroType::Map(_) => "map".into(),
            AvroType::Union(_) => "union".into(),
            AvroType::Named(name) => format!("'{}'", name),
        }
    }
}

/// Record, enum and fixed definitions
#[derive(Debug, Clone)]
pub enum NamedType {
    Record(RecordType),
    Enum(EnumType),
    Fixed(FixedType),
}

impl NamedType {
    fn name(&self) -> &str {
        match self {
            NamedType::Record(r) => &r.name,
            NamedType::Enum(e) => &e.name,
            NamedType::Fixed(f) => &f.name,
        }
    }

    fn aliases(&self) -> &[String] {
        match self {
            NamedType::Record(r) => &r.aliases,
            NamedType::Enum(e) => &e.aliases,
            NamedType::Fixed(f) => &f.aliases,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            NamedType::Record(_) => "record",
            NamedType::Enum(_) => "enum",
            NamedType::Fixed(_) => "fixed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordType {
    pub name: String,
    pub aliases: Vec<String>,
    pub fields: Vec<RecordField>,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub aliases: Vec<String>,
    pub ty: AvroType,
    /// Explicit default; `Some(Value::Null)` is a real null default
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub aliases: Vec<String>,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FixedType {
    pub name: String,
    pub aliases: Vec<String>,
    pub size: u64,
}

/// A parsed Avro schema: the root type plus every named type it declares
#[derive(Debug, Clone)]
pub struct AvroSchema {
    root: AvroType,
    named: BTreeMap<String, NamedType>,
}

impl AvroSchema {
    pub fn parse(document: &Value) -> Result<Self> {
        let mut parser = Parser::default();
        let root = parser.parse(document, None)?;
        Ok(Self {
            root,
            named: parser.named,
        })
    }

    pub fn root(&self) -> &AvroType {
        &self.root
    }

    pub fn named_type(&self, fullname: &str) -> Option<&NamedType> {
        self.named.get(fullname)
    }

    /// Whether data written with `writer` can be read with `self`
    pub fn can_read(&self, writer: &AvroSchema) -> std::result::Result<(), Incompatibility> {
        let mut resolver = Resolver {
            reader: self,
            writer,
            seen: HashSet::new(),
        };
        resolver.resolve(&self.root, &writer.root, "")
    }
}

fn invalid(message: impl Into<String>) -> SchemaError {
    SchemaError::InvalidSchema(message.into())
}

#[derive(Default)]
struct Parser {
    named: BTreeMap<String, NamedType>,
    declared: HashSet<String>,
}

impl Parser {
    fn parse(&mut self, value: &Value, namespace: Option<&str>) -> Result<AvroType> {
        match value {
            Value::String(name) => self.resolve_name(name, namespace),
            Value::Array(branches) => {
                let branches = branches
                    .iter()
                    .map(|b| self.parse(b, namespace))
                    .collect::<Result<Vec<_>>>()?;
                Ok(AvroType::Union(branches))
            }
            Value::Object(obj) => self.parse_object(obj, namespace),
            other => Err(invalid(format!("unexpected schema element: {}", other))),
        }
    }

    fn parse_object(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let ty = obj.get("type").ok_or_else(|| invalid("schema object without 'type'"))?;
        let type_name = match ty {
            Value::String(s) => s.as_str(),
            nested => return self.parse(nested, namespace),
        };

        match type_name {
            "record" | "error" => self.parse_record(obj, namespace),
            "enum" => self.parse_enum(obj, namespace),
            "fixed" => self.parse_fixed(obj, namespace),
            "array" => {
                let items = obj.get("items").ok_or_else(|| invalid("array without 'items'"))?;
                Ok(AvroType::Array(Box::new(self.parse(items, namespace)?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| invalid("map without 'values'"))?;
                Ok(AvroType::Map(Box::new(self.parse(values, namespace)?)))
            }
            // Primitives, possibly annotated with a logicalType; resolution
            // works on the underlying type.
            other => self.resolve_name(other, namespace),
        }
    }

    fn resolve_name(&self, name: &str, namespace: Option<&str>) -> Result<AvroType> {
        if let Some(primitive) = AvroType::primitive(name) {
            return Ok(primitive);
        }
        let full = fullname(name, namespace);
        if self.declared.contains(&full) {
            Ok(AvroType::Named(full))
        } else if self.declared.contains(name) {
            Ok(AvroType::Named(name.to_string()))
        } else {
            Err(invalid(format!("unknown type '{}'", name)))
        }
    }

    /// Register a named type; returns its full name and the namespace its
    /// children inherit.
    fn declare(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<(String, Option<String>)> {
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("named type without 'name'"))?;

        let own_namespace = match name.rfind('.') {
            Some(idx) => Some(name[..idx].to_string()),
            None => obj
                .get("namespace")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| namespace.map(String::from)),
        };
        let own_namespace = own_namespace.filter(|ns| !ns.is_empty());
        let full = fullname(name, own_namespace.as_deref());

        if !self.declared.insert(full.clone()) {
            return Err(invalid(format!("type '{}' is defined more than once", full)));
        }
        Ok((full, own_namespace))
    }

    fn parse_record(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (name, own_namespace) = self.declare(obj, namespace)?;
        let aliases = aliases(obj, own_namespace.as_deref());
        let raw_fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(format!("record '{}' without 'fields'", name)))?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for raw in raw_fields {
            let field_name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(format!("field without 'name' in record '{}'", name)))?;
            let field_type = raw
                .get("type")
                .ok_or_else(|| invalid(format!("field '{}' without 'type'", field_name)))?;
            fields.push(RecordField {
                name: field_name.to_string(),
                aliases: string_list(raw.get("aliases")),
                ty: self.parse(field_type, own_namespace.as_deref())?,
                default: raw.get("default").cloned(),
            });
        }

        self.named.insert(name.clone(), NamedType::Record(RecordType { name: name.clone(), aliases, fields }));
        Ok(AvroType::Named(name))
    }

    fn parse_enum(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (name, own_namespace) = self.declare(obj, namespace)?;
        let symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(format!("enum '{}' without 'symbols'", name)))?
            .iter()
            .map(|s| s.as_str().map(String::from).ok_or_else(|| invalid("enum symbol must be a string")))
            .collect::<Result<Vec<_>>>()?;
        let definition = EnumType {
            name: name.clone(),
            aliases: aliases(obj, own_namespace.as_deref()),
            symbols,
            default: obj.get("default").and_then(Value::as_str).map(String::from),
        };
        self.named.insert(name.clone(), NamedType::Enum(definition));
        Ok(AvroType::Named(name))
    }

    fn parse_fixed(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (name, own_namespace) = self.declare(obj, namespace)?;
        let size = obj
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid(format!("fixed '{}' without a valid 'size'", name)))?;
        let definition = FixedType {
            name: name.clone(),
            aliases: aliases(obj, own_namespace.as_deref()),
            size,
        };
        self.named.insert(name.clone(), NamedType::Fixed(definition));
        Ok(AvroType::Named(name))
    }
}

fn fullname(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !name.contains('.') && !ns.is_empty() => format!("{}.{}", ns, name),
        _ => name.to_string(),
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

fn aliases(obj: &Map<String, Value>, namespace: Option<&str>) -> Vec<String> {
    string_list(obj.get("aliases"))
        .into_iter()
        .map(|alias| fullname(&alias, namespace))
        .collect()
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

struct Resolver<'a> {
    reader: &'a AvroSchema,
    writer: &'a AvroSchema,
    /// Record pairs already assumed compatible, so recursive types terminate
    seen: HashSet<(String, String)>,
}

impl Resolver<'_> {
    fn resolve(&mut self, reader: &AvroType, writer: &AvroType, path: &str) -> std::result::Result<(), Incompatibility> {
        use AvroType::*;

        match (reader, writer) {
            // Every branch the writer may pick has to be readable.
            (_, Union(branches)) => {
                for branch in branches {
                    self.resolve(reader, branch, path)?;
                }
                Ok(())
            }
            (Union(branches), _) => {
                for branch in branches {
                    let saved = self.seen.clone();
                    if self.resolve(branch, writer, path).is_ok() {
                        return Ok(());
                    }
                    self.seen = saved;
                }
                Err(Incompatibility::new(
                    IncompatibilityKind::MissingUnionBranch,
                    display_path(path),
                    format!("reader union has no branch for writer type {}", self.describe(writer, self.writer)),
                ))
            }

            (Null, Null) | (Boolean, Boolean) | (Int, Int) | (Long, Long) | (Float, Float)
            | (Double, Double) | (Bytes, Bytes) | (String, String) => Ok(()),

            // Avro type promotions
            (Long, Int) | (Float, Int) | (Float, Long) | (Double, Int) | (Double, Long)
            | (Double, Float) | (String, Bytes) | (Bytes, String) => Ok(()),

            (Array(r), Array(w)) => self.resolve(r, w, &format!("{}/items", path)),
            (Map(r), Map(w)) => self.resolve(r, w, &format!("{}/values", path)),
            (Named(r), Named(w)) => self.resolve_named(r, w, path),

            _ => Err(Incompatibility::new(
                IncompatibilityKind::TypeMismatch,
                display_path(path),
                format!(
                    "reader type {} cannot read writer type {}",
                    self.describe(reader, self.reader),
                    self.describe(writer, self.writer)
                ),
            )),
        }
    }

    fn resolve_named(&mut self, reader_name: &str, writer_name: &str, path: &str) -> std::result::Result<(), Incompatibility> {
        let (reader, writer) = match (self.reader.named.get(reader_name), self.writer.named.get(writer_name)) {
            (Some(r), Some(w)) => (r, w),
            _ => {
                return Err(Incompatibility::new(
                    IncompatibilityKind::TypeMismatch,
                    display_path(path),
                    format!("unresolved named type '{}' or '{}'", reader_name, writer_name),
                ))
            }
        };

        let names_match = short_name(reader.name()) == short_name(writer.name())
            || reader
                .aliases()
                .iter()
                .any(|alias| alias == writer.name() || short_name(alias) == short_name(writer.name()));

        match (reader, writer) {
            (NamedType::Record(r), NamedType::Record(w)) => {
                let record_path = if path.is_empty() {
                    format!("/{}", short_name(&r.name))
                } else {
                    path.to_string()
                };
                if !names_match {
                    return Err(name_mismatch(&record_path, reader, writer));
                }
                if !self.seen.insert((r.name.clone(), w.name.clone())) {
                    return Ok(());
                }
                for field in &r.fields {
                    let field_path = format!("{}/{}", record_path, field.name);
                    let written = w
                        .fields
                        .iter()
                        .find(|wf| wf.name == field.name || field.aliases.contains(&wf.name));
                    match written {
                        Some(wf) => self.resolve(&field.ty, &wf.ty, &field_path)?,
                        None if field.default.is_none() => {
                            return Err(Incompatibility::new(
                                IncompatibilityKind::MissingDefault,
                                field_path,
                                format!(
                                    "reader field '{}' has no default value and is missing from the writer schema",
                                    field.name
                                ),
                            ))
                        }
                        None => {}
                    }
                }
                Ok(())
            }
            (NamedType::Enum(r), NamedType::Enum(w)) => {
                if !names_match {
                    return Err(name_mismatch(&display_path(path), reader, writer));
                }
                if r.default.is_some() {
                    return Ok(());
                }
                match w.symbols.iter().find(|symbol| !r.symbols.contains(symbol)) {
                    Some(missing) => Err(Incompatibility::new(
                        IncompatibilityKind::MissingEnumSymbol,
                        display_path(path),
                        format!("reader enum '{}' lacks writer symbol '{}'", r.name, missing),
                    )),
                    None => Ok(()),
                }
            }
            (NamedType::Fixed(r), NamedType::Fixed(w)) => {
                if !names_match {
                    return Err(name_mismatch(&display_path(path), reader, writer));
                }
                if r.size != w.size {
                    return Err(Incompatibility::new(
                        IncompatibilityKind::SizeMismatch,
                        display_path(path),
                        format!("fixed '{}' size changed from {} to {}", r.name, w.size, r.size),
                    ));
                }
                Ok(())
            }
            _ => Err(Incompatibility::new(
                IncompatibilityKind::TypeMismatch,
                display_path(path),
                format!(
                    "reader {} '{}' cannot read writer {} '{}'",
                    reader.kind(),
                    reader.name(),
                    writer.kind(),
                    writer.name()
                ),
            )),
        }
    }

    fn describe(&self, ty: &AvroType, schema: &AvroSchema) -> String {
        match ty {
            AvroType::Named(name) => match schema.named.get(name) {
                Some(named) => format!("{} '{}'", named.kind(), name),
                None => ty.describe(),
            },
            other => other.describe(),
        }
    }
}

fn name_mismatch(path: &str, reader: &NamedType, writer: &NamedType) -> Incompatibility {
    Incompatibility::new(
        IncompatibilityKind::NameMismatch,
        path,
        format!("reader {} '{}' does not match writer name '{}'", reader.kind(), reader.name(), writer.name()),
    )
}
