// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity Definitions and Identity
//!
//! An entity is identity-bearing, schema-shaped state owned by exactly one
//! command execution at a time.
//!
//! # Root and Child Entities
//!
//! ```text
//! EntityRecord (root: "order" / "o-1", version 7)
//! ├── state          { "order_id": "o-1", ... }
//! └── children
//!     └── "order_line"
//!         ├── "l-1"  { "line_id": "l-1", ... }
//!         └── "l-2"  { "line_id": "l-2", ... }
//! ```
//!
//! A child entity is routed through its parent's identity and written as
//! part of the parent's record, so mutating a child is still exactly one
//! entity write.

mod record;

pub use record::EntityRecord;

use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;

use crate::invariant::Invariant;
use crate::schema::{FieldType, Schema};

/// Identity a command resolves to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Identity of the targeted entity
    pub id: String,

    /// Identity of the parent, required when the entity is a child
    pub parent_id: Option<String>,
}

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
        }
    }

    pub fn child(parent_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
        }
    }
}

/// Maps a command payload to its target identity
pub type TargetFn = Arc<dyn Fn(&Value) -> Option<Target> + Send + Sync>;

/// Target taken from a top-level payload field (string or integer)
pub fn target_field(field: impl Into<String>) -> TargetFn {
    let field = field.into();
    Arc::new(move |payload: &Value| payload.get(&field).and_then(scalar_key).map(Target::new))
}

/// Child target taken from a parent id field and a child id field
pub fn child_target_fields(parent_field: impl Into<String>, id_field: impl Into<String>) -> TargetFn {
    let parent_field = parent_field.into();
    let id_field = id_field.into();
    Arc::new(move |payload: &Value| {
        let parent = payload.get(&parent_field).and_then(scalar_key)?;
        let id = payload.get(&id_field).and_then(scalar_key)?;
        Some(Target::child(parent, id))
    })
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Link from a child entity to its parent entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub entity: String,
}

/// Named schema plus identity extraction
#[derive(Clone)]
pub struct EntityDefinition {
    name: String,
    schema: Schema,
    key_field: String,
    parent: Option<ParentLink>,
    invariants: Vec<Invariant>,
}

impl EntityDefinition {
    /// Root entity keyed by the `id` field
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            key_field: "id".to_string(),
            parent: None,
            invariants: Vec::new(),
        }
    }

    /// Field that carries the entity identity
    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    /// Make this a child of `parent`
    pub fn child_of(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(ParentLink {
            entity: parent.into(),
        });
        self
    }

    /// Attach an entity-, command- or event-scoped invariant
    pub fn invariant(mut self, invariant: Invariant) -> Self {
        self.invariants.push(invariant);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn invariants(&self) -> &[Invariant] {
        &self.invariants
    }

    /// Extract the identity from entity state
    pub fn identity(&self, state: &Value) -> Option<String> {
        state.get(&self.key_field).and_then(scalar_key)
    }

    /// Fresh, uninitialized state bound to `id`
    pub fn blank(&self, id: &str) -> Value {
        let mut object = Map::new();
        object.insert(self.key_field.clone(), self.key_value(id));
        Value::Object(object)
    }

    /// `id` in the type the schema declares for the key field
    fn key_value(&self, id: &str) -> Value {
        let declared = self
            .schema
            .fields()
            .iter()
            .find(|f| f.name == self.key_field)
            .map(|f| &f.field_type);

        match declared {
            Some(FieldType::Integer | FieldType::Number) => id
                .parse::<Number>()
                .map(Value::Number)
                .unwrap_or_else(|_| Value::String(id.to_string())),
            _ => Value::String(id.to_string()),
        }
    }
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("key_field", &self.key_field)
            .field("parent", &self.parent)
            .field("invariants", &self.invariants.len())
            .finish()
    }
}

/// Parent half of a child entity key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentKey {
    pub entity_type: String,
    pub id: String,
}

/// Fully resolved entity address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: String,
    pub id: String,
    pub parent: Option<ParentKey>,
}

impl EntityKey {
    pub fn root(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            parent: None,
        }
    }

    pub fn child(
        parent_type: impl Into<String>,
        parent_id: impl Into<String>,
        entity_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            parent: Some(ParentKey {
                entity_type: parent_type.into(),
                id: parent_id.into(),
            }),
        }
    }

    /// Entity type of the persisted record
    pub fn root_type(&self) -> &str {
        self.parent
            .as_ref()
            .map_or(self.entity_type.as_str(), |p| p.entity_type.as_str())
    }

    /// Identity of the persisted record
    pub fn root_id(&self) -> &str {
        self.parent.as_ref().map_or(self.id.as_str(), |p| p.id.as_str())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(
                f,
                "{}/{}/{}/{}",
                parent.entity_type, parent.id, self.entity_type, self.id
            ),
            None => write!(f, "{}/{}", self.entity_type, self.id),
        }
    }
}
