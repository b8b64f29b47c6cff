// Copyright (c) 2025 - Cowboy AI, Inc.
//! Entity Resolver
//!
//! Applies a handler's [`CreationPolicy`] to the repository result:
//!
//! | policy      | instance exists        | instance absent     |
//! |-------------|------------------------|---------------------|
//! | `Always`    | `CreationConflict`     | fresh blank state   |
//! | `Never`     | load                   | `NotFound`          |
//! | `IfMissing` | load                   | fresh blank state   |
//!
//! Child entities are looked up inside their parent's record; the parent
//! itself must already exist.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::entity::{EntityDefinition, EntityKey, EntityRecord, Target};
use crate::errors::{EngineError, RepositoryError};
use crate::ports::{EntityRepository, ExpectedVersion};

/// Whether an execution may create, must find, or may do either
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    Always,
    Never,
    IfMissing,
}

impl fmt::Display for CreationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreationPolicy::Always => write!(f, "always"),
            CreationPolicy::Never => write!(f, "never"),
            CreationPolicy::IfMissing => write!(f, "if_missing"),
        }
    }
}

/// Creation policy could not be satisfied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: String, id: String },

    #[error("{entity_type} {id} already exists")]
    CreationConflict { entity_type: String, id: String },

    #[error("Parent {parent_type} {parent_id} of {entity_type} {id} not found")]
    ParentNotFound {
        parent_type: String,
        parent_id: String,
        entity_type: String,
        id: String,
    },

    #[error("{entity_type} {id} is a child entity but no parent identity was given")]
    MissingParentIdentity { entity_type: String, id: String },

    #[error("Command {command} payload does not identify its target")]
    MissingTarget { command: String },
}

impl ResolutionError {
    /// Stable business code
    pub fn code(&self) -> &'static str {
        match self {
            ResolutionError::NotFound { .. } => "entity_not_found",
            ResolutionError::CreationConflict { .. } => "creation_conflict",
            ResolutionError::ParentNotFound { .. } => "parent_not_found",
            ResolutionError::MissingParentIdentity { .. } => "missing_parent_identity",
            ResolutionError::MissingTarget { .. } => "missing_target",
        }
    }
}

/// The single entity an execution may mutate
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub key: EntityKey,

    /// Root record to write back (holds the child for child entities)
    pub record: EntityRecord,

    /// Working copy of the bound entity's state
    pub state: Value,

    /// Whether the state was freshly constructed
    pub is_new: bool,

    pub expected_version: ExpectedVersion,
}

impl ResolvedEntity {
    /// Fold the working state back into the root record
    pub fn into_record(self) -> (EntityKey, EntityRecord, ExpectedVersion) {
        let Self {
            key,
            mut record,
            state,
            expected_version,
            ..
        } = self;

        if key.parent.is_some() {
            record.put_child(&key.entity_type, &key.id, state);
        } else {
            record.state = state;
        }
        (key, record, expected_version)
    }
}

/// Resolve `target` for `definition` under `policy`
pub async fn resolve(
    repository: &dyn EntityRepository,
    definition: &EntityDefinition,
    target: &Target,
    policy: CreationPolicy,
) -> Result<ResolvedEntity, EngineError> {
    let entity_type = definition.name();

    match definition.parent() {
        None => {
            let existing = repository
                .load(entity_type, &target.id)
                .await
                .map_err(unavailable)?;
            let expected_version = existing
                .as_ref()
                .map_or(ExpectedVersion::NoRecord, ExpectedVersion::of);
            let (state, is_new) = apply(
                policy,
                existing.as_ref().map(|r| r.state.clone()),
                definition,
                &target.id,
            )?;
            let record = existing
                .unwrap_or_else(|| EntityRecord::new(entity_type, target.id.clone(), Value::Null));

            debug!(entity = entity_type, id = %target.id, %policy, is_new, "Resolved entity");
            Ok(ResolvedEntity {
                key: EntityKey::root(entity_type, target.id.clone()),
                record,
                state,
                is_new,
                expected_version,
            })
        }
        Some(parent) => {
            let parent_id = target.parent_id.clone().ok_or_else(|| {
                ResolutionError::MissingParentIdentity {
                    entity_type: entity_type.to_string(),
                    id: target.id.clone(),
                }
            })?;
            let record = repository
                .load(&parent.entity, &parent_id)
                .await
                .map_err(unavailable)?
                .ok_or_else(|| ResolutionError::ParentNotFound {
                    parent_type: parent.entity.clone(),
                    parent_id: parent_id.clone(),
                    entity_type: entity_type.to_string(),
                    id: target.id.clone(),
                })?;

            let (state, is_new) = apply(
                policy,
                record.child(entity_type, &target.id).cloned(),
                definition,
                &target.id,
            )?;

            debug!(
                entity = entity_type,
                id = %target.id,
                parent = %parent_id,
                %policy,
                is_new,
                "Resolved child entity"
            );
            Ok(ResolvedEntity {
                key: EntityKey::child(&parent.entity, parent_id, entity_type, target.id.clone()),
                expected_version: ExpectedVersion::of(&record),
                record,
                state,
                is_new,
            })
        }
    }
}

fn apply(
    policy: CreationPolicy,
    existing: Option<Value>,
    definition: &EntityDefinition,
    id: &str,
) -> Result<(Value, bool), ResolutionError> {
    match (policy, existing) {
        (CreationPolicy::Always, Some(_)) => Err(ResolutionError::CreationConflict {
            entity_type: definition.name().to_string(),
            id: id.to_string(),
        }),
        (CreationPolicy::Never, None) => Err(ResolutionError::NotFound {
            entity_type: definition.name().to_string(),
            id: id.to_string(),
        }),
        (CreationPolicy::Never | CreationPolicy::IfMissing, Some(state)) => Ok((state, false)),
        (CreationPolicy::Always | CreationPolicy::IfMissing, None) => Ok((definition.blank(id), true)),
    }
}

fn unavailable(err: RepositoryError) -> EngineError {
    EngineError::Fatal(anyhow::Error::new(err).context("entity load failed"))
}
