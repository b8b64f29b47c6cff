// Copyright (c) 2025 - Cowboy AI, Inc.
//! Handler Registry
//!
//! A handler is a data record, looked up by command type at dispatch time:
//!
//! ```text
//! HandlerRegistration {
//!     command_type:    "RedeemCard",
//!     entity_type:     Some("gift_card"),
//!     creation_policy: Never,
//!     invariants:      [insufficient_balance],
//!     handler:         Arc<dyn CommandHandler>,
//! }
//! ```
//!
//! Wiring mistakes are caught once, when the registry is built, rather than
//! on the first command that hits them.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::entity::{EntityDefinition, Target, TargetFn};
use crate::errors::ConfigurationError;
use crate::handler::CommandHandler;
use crate::invariant::{Invariant, InvariantPlan};
use crate::resolver::CreationPolicy;
use crate::schema::Schema;

/// Event schemas by event type
pub type EventCatalog = HashMap<String, EventDefinition>;

/// Named command schema with an optional target function
#[derive(Clone)]
pub struct CommandDefinition {
    name: String,
    schema: Schema,
    target: Option<TargetFn>,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            target: None,
        }
    }

    /// Declare how the payload identifies the target entity
    pub fn targeting(mut self, target: TargetFn) -> Self {
        self.target = Some(target);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Resolve the target from a payload; `None` when undeclared or absent
    pub fn target(&self, payload: &Value) -> Option<Target> {
        self.target.as_ref().and_then(|f| f(payload))
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("schema", &self.schema.name())
            .field("has_target", &self.has_target())
            .finish()
    }
}

/// Named event schema
#[derive(Debug, Clone)]
pub struct EventDefinition {
    name: String,
    schema: Schema,
}

impl EventDefinition {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Binding of one command type to its handler
#[derive(Clone)]
pub struct HandlerRegistration {
    pub command_type: String,
    pub entity_type: Option<String>,
    pub creation_policy: CreationPolicy,
    pub invariants: Vec<Invariant>,
    pub handler: Arc<dyn CommandHandler>,
}

impl HandlerRegistration {
    /// Handler that receives no entity
    pub fn stateless(command_type: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            command_type: command_type.into(),
            entity_type: None,
            creation_policy: CreationPolicy::Never,
            invariants: Vec::new(),
            handler,
        }
    }

    /// Handler bound to one entity type under a creation policy
    pub fn for_entity(
        command_type: impl Into<String>,
        entity_type: impl Into<String>,
        creation_policy: CreationPolicy,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            command_type: command_type.into(),
            entity_type: Some(entity_type.into()),
            creation_policy,
            invariants: Vec::new(),
            handler,
        }
    }

    /// Attach a handler-level (command-scoped) invariant
    pub fn invariant(mut self, invariant: Invariant) -> Self {
        self.invariants.push(invariant);
        self
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("command_type", &self.command_type)
            .field("entity_type", &self.entity_type)
            .field("creation_policy", &self.creation_policy)
            .field("invariants", &self.invariants)
            .finish()
    }
}

/// Everything dispatch needs for one command type
#[derive(Clone)]
pub(crate) struct Binding {
    pub command: CommandDefinition,
    pub entity: Option<EntityDefinition>,
    pub creation_policy: CreationPolicy,
    pub plan: InvariantPlan,
    pub handler: Arc<dyn CommandHandler>,
}

/// Collects definitions; [`RegistryBuilder::build`] validates the wiring
#[derive(Default)]
pub struct RegistryBuilder {
    commands: HashMap<String, CommandDefinition>,
    entities: HashMap<String, EntityDefinition>,
    events: EventCatalog,
    handlers: Vec<HandlerRegistration>,
    errors: Vec<ConfigurationError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(&mut self, definition: CommandDefinition) -> &mut Self {
        let name = definition.name().to_string();
        if self.commands.insert(name.clone(), definition).is_some() {
            self.errors.push(ConfigurationError::DuplicateCommand(name));
        }
        self
    }

    pub fn entity(&mut self, definition: EntityDefinition) -> &mut Self {
        let name = definition.name().to_string();
        if self.entities.insert(name.clone(), definition).is_some() {
            self.errors.push(ConfigurationError::DuplicateEntity(name));
        }
        self
    }

    pub fn event(&mut self, definition: EventDefinition) -> &mut Self {
        let name = definition.name().to_string();
        if self.events.insert(name.clone(), definition).is_some() {
            self.errors.push(ConfigurationError::DuplicateEvent(name));
        }
        self
    }

    pub fn handler(&mut self, registration: HandlerRegistration) -> &mut Self {
        self.handlers.push(registration);
        self
    }

    /// Validate the wiring and freeze it
    pub fn build(self) -> Result<Registry, ConfigurationError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        for entity in self.entities.values() {
            if let Some(parent) = entity.parent() {
                match self.entities.get(&parent.entity) {
                    None => {
                        return Err(ConfigurationError::UnknownEntity {
                            referenced_by: entity.name().to_string(),
                            entity: parent.entity.clone(),
                        })
                    }
                    Some(p) if p.is_child() => {
                        return Err(ConfigurationError::NestedChild {
                            entity: entity.name().to_string(),
                            parent: parent.entity.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let mut bindings = HashMap::new();
        for registration in self.handlers {
            let command_type = registration.command_type.clone();
            let command = self
                .commands
                .get(&command_type)
                .cloned()
                .ok_or_else(|| ConfigurationError::UnknownCommand(command_type.clone()))?;

            let entity = match &registration.entity_type {
                Some(entity_type) => {
                    let entity = self.entities.get(entity_type).cloned().ok_or_else(|| {
                        ConfigurationError::UnknownEntity {
                            referenced_by: command_type.clone(),
                            entity: entity_type.clone(),
                        }
                    })?;
                    if !command.has_target() {
                        return Err(ConfigurationError::MissingTarget {
                            command: command_type,
                            entity: entity_type.clone(),
                        });
                    }
                    Some(entity)
                }
                None if command.has_target() => {
                    return Err(ConfigurationError::UnboundTarget {
                        command: command_type,
                    })
                }
                None => None,
            };

            let entity_rules = entity.as_ref().map_or(&[][..], EntityDefinition::invariants);
            let plan = InvariantPlan::build(&command_type, entity_rules, &registration.invariants);

            let binding = Binding {
                command,
                entity,
                creation_policy: registration.creation_policy,
                plan,
                handler: registration.handler,
            };
            if bindings.insert(command_type.clone(), binding).is_some() {
                return Err(ConfigurationError::DuplicateHandler(command_type));
            }
        }

        Ok(Registry {
            commands: self.commands,
            entities: self.entities,
            events: Arc::new(self.events),
            bindings,
        })
    }
}

/// Frozen, validated wiring shared by every execution
pub struct Registry {
    commands: HashMap<String, CommandDefinition>,
    entities: HashMap<String, EntityDefinition>,
    events: Arc<EventCatalog>,
    bindings: HashMap<String, Binding>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn command(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.get(name)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    pub fn event(&self, name: &str) -> Option<&EventDefinition> {
        self.events.get(name)
    }

    /// Whether a handler is bound for `command_type`
    pub fn has_handler(&self, command_type: &str) -> bool {
        self.bindings.contains_key(command_type)
    }

    /// Ordered invariant plan for a bound command
    pub fn plan(&self, command_type: &str) -> Option<&InvariantPlan> {
        self.bindings.get(command_type).map(|b| &b.plan)
    }

    pub(crate) fn binding(&self, command_type: &str) -> Option<&Binding> {
        self.bindings.get(command_type)
    }

    pub(crate) fn events(&self) -> Arc<EventCatalog> {
        self.events.clone()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.bindings.keys().collect();
        commands.sort();
        f.debug_struct("Registry")
            .field("handlers", &commands)
            .field("entities", &self.entities.len())
            .field("events", &self.events.len())
            .finish()
    }
}
