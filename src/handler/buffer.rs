// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Buffer
//!
//! Append-only staging area private to one execution. Events are validated
//! against their registered schema when raised and stamped with the trace,
//! the causing command and the root entity identity. Nothing leaves the
//! buffer until the transaction commits; on rollback it is simply dropped.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::entity::EntityKey;
use crate::envelope::EventEnvelope;
use crate::registry::EventCatalog;
use crate::schema::ValidationError;

/// A raise the buffer refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaiseError {
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Invalid {event_type} payload: {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: ValidationError,
    },
}

/// Per-execution event staging
#[derive(Debug)]
pub struct EventBuffer {
    catalog: Arc<EventCatalog>,
    trace_id: String,
    causation_id: Uuid,
    entity_type: Option<String>,
    target_id: Option<String>,
    events: Vec<EventEnvelope>,
}

impl EventBuffer {
    /// Empty buffer for `context`, correlated with the root of `entity`
    pub fn new(catalog: Arc<EventCatalog>, context: &ExecutionContext, entity: Option<&EntityKey>) -> Self {
        Self {
            catalog,
            trace_id: context.trace_id.clone(),
            causation_id: context.message_id,
            entity_type: entity.map(|k| k.root_type().to_string()),
            target_id: entity.map(|k| k.root_id().to_string()),
            events: Vec::new(),
        }
    }

    /// Validate and append an event
    pub fn raise(&mut self, event_type: &str, payload: Value) -> Result<&EventEnvelope, RaiseError> {
        let definition = self
            .catalog
            .get(event_type)
            .ok_or_else(|| RaiseError::UnknownEvent(event_type.to_string()))?;
        let validated = definition
            .schema()
            .validate(&payload)
            .map_err(|source| RaiseError::InvalidPayload {
                event_type: event_type.to_string(),
                source,
            })?;

        let sequence = self.events.len() as u32;
        self.events.push(EventEnvelope {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            payload: validated.into_value(),
            entity_type: self.entity_type.clone(),
            target_id: self.target_id.clone(),
            trace_id: self.trace_id.clone(),
            causation_id: self.causation_id,
            sequence,
            occurred_at: Utc::now(),
        });

        Ok(&self.events[self.events.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in raise order
    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub fn into_events(self) -> Vec<EventEnvelope> {
        self.events
    }
}
