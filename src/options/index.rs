//! Option Index
//!
//! Walks the JSON schema of a configuration model once and flattens every
//! leaf field into a case-insensitive dotted key.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use schemars::gen::SchemaSettings;
use schemars::schema::{InstanceType, ObjectValidation, RootSchema, Schema, SchemaObject, SingleOrVec};
use schemars::JsonSchema;
use std::fmt;

const DEFINITIONS_PREFIX: &str = "#/definitions/";

// =============================================================================
// Index Entries
// =============================================================================

/// One step from a parent value to a child value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Named struct field (serialization name)
    Field(String),
    /// Every element of a sequence
    Each,
}

/// Kind of value stored at an indexed leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafKind {
    Bool,
    Int { signed: bool, bits: u8 },
    Float { bits: u8 },
    String,
    /// Untyped value, assigned as a string
    Any,
    Sequence(Box<LeafKind>),
    Map(Box<LeafKind>),
    /// Struct-valued map entry or nested collection, which the override
    /// grammar cannot express
    Composite,
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKind::Bool => write!(f, "bool"),
            LeafKind::Int { signed: true, bits } => write!(f, "int{}", bits),
            LeafKind::Int { signed: false, bits } => write!(f, "uint{}", bits),
            LeafKind::Float { bits } => write!(f, "float{}", bits),
            LeafKind::String => write!(f, "string"),
            LeafKind::Any => write!(f, "any"),
            LeafKind::Sequence(elem) => write!(f, "[]{}", elem),
            LeafKind::Map(value) => write!(f, "map[string]{}", value),
            LeafKind::Composite => write!(f, "object"),
        }
    }
}

/// Index entry for a single leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionEntry {
    /// Segments from the model root to the leaf
    pub path: Vec<PathSegment>,
    /// Value kind at the leaf
    pub kind: LeafKind,
    /// Whether the leaf or one of its parents may be absent
    pub optional: bool,
}

impl OptionEntry {
    /// Human readable path, `[*]` marks sequence broadcast
    pub fn display_path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                PathSegment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                PathSegment::Each => out.push_str("[*]"),
            }
        }
        out
    }
}

/// Normalize a user supplied option key
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

// =============================================================================
// Option Index
// =============================================================================

/// Flattened mapping from normalized dotted key to leaf path
#[derive(Debug, Clone, Default)]
pub struct OptionIndex {
    entries: IndexMap<String, OptionEntry>,
}

impl OptionIndex {
    /// Build the index for a model type
    pub fn build<T: JsonSchema>() -> Result<Self> {
        let root = SchemaSettings::draft07()
            .into_generator()
            .into_root_schema_for::<T>();
        Self::from_root_schema(&root)
    }

    /// Build the index from an already generated schema
    pub fn from_root_schema(root: &RootSchema) -> Result<Self> {
        let mut walker = Walker {
            root,
            entries: IndexMap::new(),
            active_refs: Vec::new(),
        };
        let resolved = Resolved {
            object: &root.schema,
            nullable: false,
            reference: None,
        };
        walker.visit_resolved(resolved, &mut Vec::new(), &mut Vec::new(), false)?;
        Ok(Self {
            entries: walker.entries,
        })
    }

    /// Look up a key, normalizing it first
    pub fn lookup(&self, key: &str) -> Option<&OptionEntry> {
        self.entries.get(&normalize_key(key))
    }

    /// Whether the key is indexed
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// All normalized keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// All entries with their keys
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Schema Walker
// =============================================================================

struct Walker<'a> {
    root: &'a RootSchema,
    entries: IndexMap<String, OptionEntry>,
    /// Definitions currently being expanded, guards recursive types
    active_refs: Vec<String>,
}

/// Schema object with references and nullable wrappers peeled off
struct Resolved<'a> {
    object: &'a SchemaObject,
    nullable: bool,
    reference: Option<String>,
}

enum Shape<'a> {
    Struct(&'a ObjectValidation),
    Array(Option<&'a Schema>),
    Leaf(LeafKind),
}

impl<'a> Walker<'a> {
    fn visit(
        &mut self,
        schema: &'a Schema,
        prefix: &mut Vec<String>,
        path: &mut Vec<PathSegment>,
        optional: bool,
    ) -> Result<()> {
        match self.resolve(schema) {
            Some(resolved) => self.visit_resolved(resolved, prefix, path, optional),
            None => self.register(prefix, path, LeafKind::Any, optional),
        }
    }

    fn visit_resolved(
        &mut self,
        resolved: Resolved<'a>,
        prefix: &mut Vec<String>,
        path: &mut Vec<PathSegment>,
        optional: bool,
    ) -> Result<()> {
        let optional = optional || resolved.nullable;

        if let Some(reference) = &resolved.reference {
            if self.active_refs.contains(reference) {
                return self.register(prefix, path, LeafKind::Composite, optional);
            }
            self.active_refs.push(reference.clone());
        }

        let result = match self.shape(resolved.object) {
            Shape::Struct(object) => {
                for (name, property) in &object.properties {
                    prefix.push(name.clone());
                    path.push(PathSegment::Field(name.clone()));
                    let visited = self.visit(property, prefix, path, optional);
                    path.pop();
                    prefix.pop();
                    visited?;
                }
                Ok(())
            }
            Shape::Array(items) => match items {
                Some(item) if self.is_struct(item) => {
                    path.push(PathSegment::Each);
                    let visited = self.visit(item, prefix, path, optional);
                    path.pop();
                    visited
                }
                Some(item) => {
                    let elem = self.element_kind(item);
                    self.register(prefix, path, LeafKind::Sequence(Box::new(elem)), optional)
                }
                None => self.register(
                    prefix,
                    path,
                    LeafKind::Sequence(Box::new(LeafKind::Any)),
                    optional,
                ),
            },
            Shape::Leaf(kind) => self.register(prefix, path, kind, optional),
        };

        if resolved.reference.is_some() {
            self.active_refs.pop();
        }
        result
    }

    fn register(
        &mut self,
        prefix: &[String],
        path: &[PathSegment],
        kind: LeafKind,
        optional: bool,
    ) -> Result<()> {
        // the root itself is never an option
        if prefix.is_empty() {
            return Ok(());
        }
        let key = normalize_key(&prefix.join("."));
        let entry = OptionEntry {
            path: path.to_vec(),
            kind,
            optional,
        };
        if let Some(existing) = self.entries.get(&key) {
            return Err(Error::AmbiguousOptionKey {
                key,
                first: existing.display_path(),
                second: entry.display_path(),
            });
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    fn resolve(&self, schema: &'a Schema) -> Option<Resolved<'a>> {
        let object = match schema {
            Schema::Object(object) => object,
            Schema::Bool(_) => return None,
        };

        if let Some(reference) = &object.reference {
            let name = reference.strip_prefix(DEFINITIONS_PREFIX).unwrap_or(reference);
            let root = self.root;
            let target = root.definitions.get(name)?;
            let mut resolved = self.resolve(target)?;
            resolved.reference = Some(name.to_string());
            return Some(resolved);
        }

        if let Some(subschemas) = &object.subschemas {
            if let Some(all_of) = &subschemas.all_of {
                if all_of.len() == 1 {
                    return self.resolve(&all_of[0]);
                }
            }
            let alternatives = subschemas.any_of.as_ref().or(subschemas.one_of.as_ref());
            if let Some(alternatives) = alternatives {
                let non_null: Vec<&Schema> =
                    alternatives.iter().filter(|s| !is_null_schema(s)).collect();
                let nullable = non_null.len() != alternatives.len();
                if non_null.len() == 1 {
                    let mut resolved = self.resolve(non_null[0])?;
                    resolved.nullable |= nullable;
                    return Some(resolved);
                }
                if non_null.iter().all(|s| self.is_string(s)) {
                    return Some(Resolved {
                        object: STRING_SCHEMA.get_or_init(string_schema),
                        nullable,
                        reference: None,
                    });
                }
                return None;
            }
        }

        let nullable = match &object.instance_type {
            Some(SingleOrVec::Vec(types)) => types.contains(&InstanceType::Null),
            _ => false,
        };
        Some(Resolved {
            object,
            nullable,
            reference: None,
        })
    }

    fn shape(&self, object: &'a SchemaObject) -> Shape<'a> {
        // enum schemas carry no instance type when variants are mixed
        if object.instance_type.is_none() && object.enum_values.is_some() {
            return Shape::Leaf(LeafKind::String);
        }
        match primary_type(object) {
            Some(InstanceType::Object) => match object.object.as_deref() {
                Some(validation) if !validation.properties.is_empty() => Shape::Struct(validation),
                Some(validation) => {
                    let value = validation
                        .additional_properties
                        .as_deref()
                        .map(|schema| self.element_kind(schema))
                        .unwrap_or(LeafKind::Any);
                    Shape::Leaf(LeafKind::Map(Box::new(value)))
                }
                None => Shape::Leaf(LeafKind::Map(Box::new(LeafKind::Any))),
            },
            Some(InstanceType::Array) => {
                let items = object.array.as_deref().and_then(|array| match &array.items {
                    Some(SingleOrVec::Single(item)) => Some(&**item),
                    Some(SingleOrVec::Vec(items)) => items.first(),
                    None => None,
                });
                Shape::Array(items)
            }
            Some(InstanceType::Boolean) => Shape::Leaf(LeafKind::Bool),
            Some(InstanceType::Integer) => Shape::Leaf(integer_kind(object.format.as_deref())),
            Some(InstanceType::Number) => Shape::Leaf(float_kind(object.format.as_deref())),
            Some(InstanceType::String) => Shape::Leaf(LeafKind::String),
            Some(InstanceType::Null) | None => Shape::Leaf(LeafKind::Any),
        }
    }

    /// Kind of a sequence element or map value
    fn element_kind(&self, schema: &'a Schema) -> LeafKind {
        match self.resolve(schema) {
            Some(resolved) => match self.shape(resolved.object) {
                Shape::Leaf(LeafKind::Sequence(_)) | Shape::Leaf(LeafKind::Map(_)) => {
                    LeafKind::Composite
                }
                Shape::Leaf(kind) => kind,
                Shape::Struct(_) | Shape::Array(_) => LeafKind::Composite,
            },
            None => LeafKind::Any,
        }
    }

    fn is_struct(&self, schema: &'a Schema) -> bool {
        self.resolve(schema)
            .map(|resolved| matches!(self.shape(resolved.object), Shape::Struct(_)))
            .unwrap_or(false)
    }

    fn is_string(&self, schema: &'a Schema) -> bool {
        self.resolve(schema)
            .map(|resolved| {
                matches!(self.shape(resolved.object), Shape::Leaf(LeafKind::String))
            })
            .unwrap_or(false)
    }
}

static STRING_SCHEMA: once_cell::sync::OnceCell<SchemaObject> = once_cell::sync::OnceCell::new();

fn string_schema() -> SchemaObject {
    SchemaObject {
        instance_type: Some(SingleOrVec::Single(Box::new(InstanceType::String))),
        ..Default::default()
    }
}

fn is_null_schema(schema: &Schema) -> bool {
    match schema {
        Schema::Object(object) => matches!(
            &object.instance_type,
            Some(SingleOrVec::Single(t)) if **t == InstanceType::Null
        ),
        Schema::Bool(_) => false,
    }
}

fn primary_type(object: &SchemaObject) -> Option<InstanceType> {
    match &object.instance_type {
        Some(SingleOrVec::Single(t)) => Some(**t),
        Some(SingleOrVec::Vec(types)) => {
            let mut concrete = types.iter().filter(|t| **t != InstanceType::Null);
            match (concrete.next(), concrete.next()) {
                (Some(t), None) => Some(*t),
                _ => None,
            }
        }
        None => None,
    }
}

fn integer_kind(format: Option<&str>) -> LeafKind {
    let (signed, bits) = match format {
        Some("int8") => (true, 8),
        Some("int16") => (true, 16),
        Some("int32") => (true, 32),
        Some("uint8") => (false, 8),
        Some("uint16") => (false, 16),
        Some("uint32") => (false, 32),
        Some("uint64") | Some("uint") => (false, 64),
        _ => (true, 64),
    };
    LeafKind::Int { signed, bits }
}

fn float_kind(format: Option<&str>) -> LeafKind {
    match format {
        Some("float") => LeafKind::Float { bits: 32 },
        _ => LeafKind::Float { bits: 64 },
    }
}
