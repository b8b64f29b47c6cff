// Copyright (c) 2025 - Cowboy AI, Inc.
//! Payload Schema Validation
//!
//! Commands, events and entity state are JSON-shaped payloads declared by a
//! named [`Schema`]. The builder emits a draft 2020-12 JSON Schema which is
//! compiled once with `jsonschema`; validation is a pure function of
//! (schema, payload):
//!
//! ```text
//! raw payload ─► Schema::validate ─► ValidatedPayload
//!                      │
//!                      └─► ValidationError { every violated field }
//! ```
//!
//! All violations are reported, not just the first, with dotted/indexed
//! paths (`lines[1].sku`) so the application boundary can map them onto form
//! fields.
//!
//! # Example
//!
//! ```rust
//! use cim_command_engine::schema::{FieldSchema, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::new("IssueCard")
//!     .field(FieldSchema::string("card_id").non_blank())
//!     .field(FieldSchema::integer("amount").min(1.0));
//!
//! assert!(schema.validate(&json!({"card_id": "c-1", "amount": 100})).is_ok());
//!
//! let err = schema.validate(&json!({"card_id": " ", "amount": 0})).unwrap_err();
//! assert_eq!(err.violations.len(), 2);
//! ```

mod field;

pub use field::{Constraint, FieldSchema, FieldType};

use jsonschema::error::ValidationErrorKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Kind of rule a field broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    TypeMismatch,
    BelowMinimum,
    AboveMaximum,
    TooShort,
    TooLong,
    NotAllowed,
    Blank,
    UnknownField,
    /// Schema itself could not be compiled
    InvalidSchema,
}

/// One violated field constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path to the field (`""` for the payload root)
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl FieldViolation {
    pub fn new(path: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Structured validation failure listing every violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Name of the schema that rejected the payload
    pub schema: String,
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Violations recorded against an exact path
    pub fn violations_at<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a FieldViolation> + 'a {
        self.violations.iter().filter(move |v| v.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected payload with {} violation(s)", self.schema, self.violations.len())?;
        for violation in &self.violations {
            let path = if violation.path.is_empty() { "<root>" } else { &violation.path };
            write!(f, "; {}: {}", path, violation.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

type Compiled = Result<jsonschema::Validator, String>;

/// Declared shape of a JSON object payload
///
/// The declaration is compiled to a JSON Schema validator on first use and
/// the compiled form is shared between clones.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldSchema>,
    deny_unknown: bool,
    compiled: Arc<OnceLock<Compiled>>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields && self.deny_unknown == other.deny_unknown
    }
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            deny_unknown: false,
            compiled: Arc::default(),
        }
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self.compiled = Arc::default();
        self
    }

    /// Reject keys that are not declared
    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self.compiled = Arc::default();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Draft 2020-12 JSON Schema for this declaration
    pub fn to_json_schema(&self) -> Value {
        let mut root = self.object_json_schema();
        root.insert(
            "$schema".into(),
            json!("https://json-schema.org/draft/2020-12/schema"),
        );
        root.insert("title".into(), json!(self.name));
        Value::Object(root)
    }

    pub(crate) fn object_json_schema(&self) -> Map<String, Value> {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        let mut out = Map::new();
        out.insert("type".into(), json!("object"));
        out.insert("properties".into(), Value::Object(properties));
        out.insert("required".into(), json!(required));
        if self.deny_unknown {
            out.insert("additionalProperties".into(), json!(false));
        }
        out
    }

    fn compiled(&self) -> &Compiled {
        self.compiled.get_or_init(|| {
            jsonschema::options()
                .build(&self.to_json_schema())
                .map_err(|e| e.to_string())
        })
    }

    /// Validate a payload, collecting every violation
    ///
    /// Null object members count as absent. Violations are ordered by field
    /// declaration, then path, then kind; a field with the wrong type reports
    /// only the type mismatch.
    pub fn validate(&self, payload: &Value) -> Result<ValidatedPayload, ValidationError> {
        let mut violations = match self.compiled() {
            Ok(validator) => {
                let instance = without_nulls(payload);
                validator
                    .iter_errors(&instance)
                    .flat_map(|error| {
                        let path = pointer_to_path(&error.instance_path().to_string());
                        to_violations(error.kind(), path, error.to_string())
                    })
                    .collect::<Vec<_>>()
            }
            Err(message) => vec![FieldViolation::new(
                "",
                ViolationKind::InvalidSchema,
                format!("schema does not compile: {}", message),
            )],
        };

        let mistyped: Vec<String> = violations
            .iter()
            .filter(|v| v.kind == ViolationKind::TypeMismatch)
            .map(|v| v.path.clone())
            .collect();
        violations.retain(|v| v.kind == ViolationKind::TypeMismatch || !mistyped.contains(&v.path));
        violations.sort_by(|a, b| {
            (self.rank(&a.path), &a.path, a.kind).cmp(&(self.rank(&b.path), &b.path, b.kind))
        });
        violations.dedup();

        if violations.is_empty() {
            Ok(ValidatedPayload {
                schema: self.name.clone(),
                value: payload.clone(),
            })
        } else {
            Err(ValidationError {
                schema: self.name.clone(),
                violations,
            })
        }
    }

    /// Declaration index of the top-level field a path starts at
    fn rank(&self, path: &str) -> usize {
        let head = path.split(['.', '[']).next().unwrap_or_default();
        if head.is_empty() {
            return 0;
        }
        self.fields
            .iter()
            .position(|f| f.name == head)
            .unwrap_or(self.fields.len())
    }
}

fn to_violations(kind: &ValidationErrorKind, path: String, message: String) -> Vec<FieldViolation> {
    let kind = match kind {
        ValidationErrorKind::Required { property } => {
            let name = property.to_string();
            let path = join_path(&path, name.trim_matches('"'));
            return vec![FieldViolation::new(path, ViolationKind::Missing, "is required")];
        }
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            return unexpected
                .iter()
                .map(|name| {
                    FieldViolation::new(
                        join_path(&path, name),
                        ViolationKind::UnknownField,
                        "is not declared",
                    )
                })
                .collect();
        }
        ValidationErrorKind::Type { .. } | ValidationErrorKind::Not { .. } => ViolationKind::TypeMismatch,
        ValidationErrorKind::Minimum { .. } => ViolationKind::BelowMinimum,
        ValidationErrorKind::Maximum { .. } => ViolationKind::AboveMaximum,
        ValidationErrorKind::MinLength { .. } | ValidationErrorKind::MinItems { .. } => {
            ViolationKind::TooShort
        }
        ValidationErrorKind::MaxLength { .. } | ValidationErrorKind::MaxItems { .. } => {
            ViolationKind::TooLong
        }
        ValidationErrorKind::Enum { .. } => ViolationKind::NotAllowed,
        ValidationErrorKind::Pattern { .. } => ViolationKind::Blank,
        _ => ViolationKind::NotAllowed,
    };
    vec![FieldViolation::new(path, kind, message)]
}

/// `/lines/1/sku` → `lines[1].sku`
fn pointer_to_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push('[');
            path.push_str(&segment);
            path.push(']');
        } else {
            path = join_path(&path, &segment);
        }
    }
    path
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Copy of `value` with null object members removed at every depth
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

/// A payload that passed its schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedPayload {
    schema: String,
    value: Value,
}

impl ValidatedPayload {
    /// Name of the schema the payload satisfied
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Top-level field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Decode into the typed command
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}
