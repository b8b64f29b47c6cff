// Copyright (c) 2025 - Cowboy AI, Inc.
//! Command and Event Envelopes
//!
//! Envelopes are the wire shape of messages crossing a port: the command
//! queue for deferred execution and the event publisher after commit.
//!
//! # Lineage
//!
//! ```text
//! CommandEnvelope { messageId: m-1, traceId: t-1 }
//!   ↓ execute
//! EventEnvelope  { eventId: e-1, causationId: m-1, traceId: t-1 }
//!   ↓ event handler issues follow-up command
//! CommandEnvelope { messageId: m-2, causationId: e-1, traceId: t-1 }
//! ```
//!
//! The trace id is stable across the whole flow; the causation id always
//! names the direct parent message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A command addressed to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Unique message id (UUID v7)
    pub message_id: Uuid,

    /// Command type name
    #[serde(rename = "type")]
    pub command_type: String,

    /// Raw, not yet validated payload
    pub payload: Value,

    /// Target identity, when the command declares a target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Trace correlation id, stable across the causal chain
    pub trace_id: String,

    /// Message that caused this command, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,

    /// Request metadata from the application boundary (auth, origin, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// When the command was issued
    pub issued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn new(command_type: impl Into<String>, payload: Value, trace_id: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            command_type: command_type.into(),
            payload,
            target_id: None,
            trace_id: trace_id.into(),
            causation_id: None,
            metadata: BTreeMap::new(),
            issued_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A committed (or committing) domain event
///
/// Created only through the event buffer during a handler invocation and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event id (UUID v7)
    pub event_id: Uuid,

    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,

    /// Schema-validated payload
    pub payload: Value,

    /// Root entity type the event correlates with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Root entity identity (parent identity for child entities)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Trace correlation id inherited from the command
    pub trace_id: String,

    /// Message id of the command whose execution raised this event
    pub causation_id: Uuid,

    /// Position within the raising execution (0-based, raise order)
    pub sequence: u32,

    /// When the handler raised the event
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Payload field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}
