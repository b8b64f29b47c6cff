// Copyright (c) 2025 - Cowboy AI, Inc.
//! Field declarations and their JSON Schema form

use serde_json::{json, Map, Value};

use super::Schema;

/// Declared JSON shape of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// Nested object validated against its own schema
    Object(Schema),
    /// Array whose items all share one type
    Array(Box<FieldType>),
    /// Any non-null value
    Any,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object(_) => "object",
            FieldType::Array(_) => "array",
            FieldType::Any => "any",
        }
    }

    pub(crate) fn to_json_schema(&self) -> Map<String, Value> {
        let mut out = Map::new();
        match self {
            FieldType::Object(schema) => return schema.object_json_schema(),
            FieldType::Array(items) => {
                out.insert("type".into(), json!("array"));
                out.insert("items".into(), Value::Object(items.to_json_schema()));
            }
            FieldType::Any => {
                out.insert("not".into(), json!({"type": "null"}));
            }
            scalar => {
                out.insert("type".into(), json!(scalar.name()));
            }
        }
        out
    }
}

/// Value constraint applied once the type matches
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Numeric lower bound (inclusive)
    Min(f64),
    /// Numeric upper bound (inclusive)
    Max(f64),
    /// Minimum string length in characters, or array length
    MinLength(usize),
    /// Maximum string length in characters, or array length
    MaxLength(usize),
    /// Value must equal one of the listed values
    OneOf(Vec<Value>),
    /// String must contain a non-whitespace character
    NonBlank,
}

impl Constraint {
    fn apply(&self, field_type: &FieldType, out: &mut Map<String, Value>) {
        let array = matches!(field_type, FieldType::Array(_));
        let (keyword, value) = match self {
            Constraint::Min(min) => ("minimum", json!(min)),
            Constraint::Max(max) => ("maximum", json!(max)),
            Constraint::MinLength(min) if array => ("minItems", json!(min)),
            Constraint::MinLength(min) => ("minLength", json!(min)),
            Constraint::MaxLength(max) if array => ("maxItems", json!(max)),
            Constraint::MaxLength(max) => ("maxLength", json!(max)),
            Constraint::OneOf(allowed) => ("enum", Value::Array(allowed.clone())),
            Constraint::NonBlank => ("pattern", json!(r"\S")),
        };
        out.insert(keyword.to_string(), value);
    }
}

/// A named field within a [`Schema`]
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub constraints: Vec<Constraint>,
}

impl FieldSchema {
    /// Required field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            constraints: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldType::Object(schema))
    }

    pub fn array(name: impl Into<String>, items: FieldType) -> Self {
        Self::new(name, FieldType::Array(Box::new(items)))
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Any)
    }

    /// Absent or null values are accepted
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min(self, min: f64) -> Self {
        self.constrain(Constraint::Min(min))
    }

    pub fn max(self, max: f64) -> Self {
        self.constrain(Constraint::Max(max))
    }

    pub fn min_length(self, min: usize) -> Self {
        self.constrain(Constraint::MinLength(min))
    }

    pub fn max_length(self, max: usize) -> Self {
        self.constrain(Constraint::MaxLength(max))
    }

    pub fn one_of<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.constrain(Constraint::OneOf(values.into_iter().map(Into::into).collect()))
    }

    pub fn non_blank(self) -> Self {
        self.constrain(Constraint::NonBlank)
    }

    /// Attach an arbitrary constraint
    pub fn constrain(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// JSON Schema of the field value
    pub(crate) fn to_json_schema(&self) -> Value {
        let mut out = self.field_type.to_json_schema();
        for constraint in &self.constraints {
            constraint.apply(&self.field_type, &mut out);
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_length_maps_to_items_for_arrays() {
        let tags = FieldSchema::array("tags", FieldType::String).min_length(1).max_length(3);
        assert_eq!(
            tags.to_json_schema(),
            json!({"type": "array", "items": {"type": "string"}, "minItems": 1, "maxItems": 3})
        );
    }

    #[test]
    fn test_scalar_constraints() {
        let code = FieldSchema::string("code").non_blank().one_of(["A", "B"]);
        assert_eq!(
            code.to_json_schema(),
            json!({"type": "string", "pattern": r"\S", "enum": ["A", "B"]})
        );
    }
}
