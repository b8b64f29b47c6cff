// Copyright (c) 2025 - Cowboy AI, Inc.
//! Execution Context
//!
//! One immutable [`ExecutionContext`] is built per pipeline attempt and
//! handed explicitly to invariants and handlers. Nothing is read from
//! thread-locals or task-locals; a deferred command rebuilds an equivalent
//! context from its envelope when it is dequeued.
//!
//! The mutable half of an execution (the entity instance and the event
//! buffer) is not part of the context: it is lent to the handler through
//! [`crate::handler::HandlerScope`] for the duration of the call.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::envelope::{CommandEnvelope, EventEnvelope};

/// Caller-supplied seed for a new execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSeed {
    /// Trace id to continue; a fresh one is generated when absent
    pub trace_id: Option<String>,

    /// Message that caused this command
    pub causation_id: Option<Uuid>,

    /// Request metadata (auth subject, origin, ...)
    pub metadata: BTreeMap<String, String>,
}

impl ContextSeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Seed that continues the lineage of a published event
    pub fn caused_by(event: &EventEnvelope) -> Self {
        Self {
            trace_id: Some(event.trace_id.clone()),
            causation_id: Some(event.event_id),
            metadata: BTreeMap::new(),
        }
    }

    /// Wrap a command into an envelope carrying this seed
    pub fn into_envelope(self, command_type: &str, payload: serde_json::Value) -> CommandEnvelope {
        let trace_id = self.trace_id.unwrap_or_else(new_trace_id);
        let mut envelope =
            CommandEnvelope::new(command_type, payload, trace_id).with_metadata(self.metadata);
        envelope.causation_id = self.causation_id;
        envelope
    }
}

/// Per-attempt, immutable execution context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Unique id of this pipeline run (new on every retry attempt)
    pub execution_id: Uuid,

    /// Transaction handle for this attempt
    pub transaction_id: Uuid,

    /// Trace correlation id
    pub trace_id: String,

    /// Id of the command message being executed
    pub message_id: Uuid,

    /// Message that caused the command
    pub causation_id: Option<Uuid>,

    /// Command type being executed
    pub command_type: String,

    /// 1-based attempt counter, bumped by concurrency retries
    pub attempt: u32,

    /// Request metadata from the application boundary
    pub metadata: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Build the context for one attempt at executing `envelope`
    pub fn for_envelope(envelope: &CommandEnvelope, attempt: u32) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            transaction_id: Uuid::now_v7(),
            trace_id: envelope.trace_id.clone(),
            message_id: envelope.message_id,
            causation_id: envelope.causation_id,
            command_type: envelope.command_type.clone(),
            attempt,
            metadata: envelope.metadata.clone(),
        }
    }

    /// Metadata lookup
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Generate a fresh trace id
pub fn new_trace_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seed_generates_trace_id_when_absent() {
        let envelope = ContextSeed::new().into_envelope("IssueCard", json!({}));
        assert_eq!(envelope.trace_id.len(), 32);
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn test_seed_carries_trace_and_metadata() {
        let cause = Uuid::now_v7();
        let envelope = ContextSeed::new()
            .with_trace_id("trace-9")
            .with_causation(cause)
            .with_metadata("subject", "alice")
            .into_envelope("IssueCard", json!({}));

        let ctx = ExecutionContext::for_envelope(&envelope, 1);
        assert_eq!(ctx.trace_id, "trace-9");
        assert_eq!(ctx.causation_id, Some(cause));
        assert_eq!(ctx.metadata("subject"), Some("alice"));
        assert_eq!(ctx.message_id, envelope.message_id);
    }

    #[test]
    fn test_each_attempt_gets_fresh_transaction() {
        let envelope = ContextSeed::new().into_envelope("IssueCard", json!({}));
        let first = ExecutionContext::for_envelope(&envelope, 1);
        let second = ExecutionContext::for_envelope(&envelope, 2);

        assert_ne!(first.transaction_id, second.transaction_id);
        assert_eq!(first.trace_id, second.trace_id);
        assert_eq!(second.attempt, 2);
    }
}
