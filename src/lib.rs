// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transactional command execution for the Composable Information Machine
//!
//! A command is validated against its schema, bound to at most one entity
//! under a creation policy, guarded by before/after invariants, handled, and
//! committed atomically with the events it raised. Events are published
//! only after the entity write succeeds.
//!
//! ```text
//! Engine ─► schema ─► resolver ─► invariant (before) ─► handler ─► invariant (after) ─► transaction
//!                        │                                                      │
//!                 EntityRepository                            EntityRepository + outbox ─► EventPublisher
//! ```
//!
//! Infrastructure is injected through [`ports`]; [`adapters`] provides
//! in-memory and NATS implementations.

pub mod adapters;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod entity;
pub mod envelope;
pub mod errors;
pub mod handler;
pub mod invariant;
pub mod outbox;
pub mod ports;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod state_machine;
pub mod subjects;
pub mod subscriber;
pub mod telemetry;
pub mod transaction;
pub mod worker;

// Re-export commonly used types
pub use config::{EngineConfig, TelemetryConfig};
pub use context::{ContextSeed, ExecutionContext};
pub use dispatcher::{Accepted, CommittedEntity, Engine, EngineBuilder, EnginePorts, ExecutionOutcome};
pub use envelope::{CommandEnvelope, EventEnvelope};
pub use errors::{
    ConfigurationError, EngineError, PublishError, QueueError, RepositoryError, SubmissionError,
};
pub use transaction::Publication;

/// Everything needed to wire an engine and write handlers
pub mod prelude {
    pub use crate::adapters::{InMemoryCommandQueue, InMemoryEventPublisher, InMemoryRepository};
    pub use crate::context::{ContextSeed, ExecutionContext};
    pub use crate::dispatcher::{Engine, EnginePorts, ExecutionOutcome};
    pub use crate::entity::{child_target_fields, target_field, EntityDefinition, Target};
    pub use crate::envelope::{CommandEnvelope, EventEnvelope};
    pub use crate::errors::{EngineError, SubmissionError};
    pub use crate::handler::{fn_handler, typed_handler, CommandHandler, HandlerError, HandlerScope};
    pub use crate::invariant::{Invariant, InvariantInput};
    pub use crate::registry::{CommandDefinition, EventDefinition, HandlerRegistration};
    pub use crate::resolver::CreationPolicy;
    pub use crate::schema::{FieldSchema, FieldType, Schema, ValidatedPayload};
}
