// Copyright (c) 2025 - Cowboy AI, Inc.
//! Temporal Dispatcher
//!
//! The front door of the engine. A command either runs now, in the
//! caller's task, or is handed to a queue and runs later through exactly
//! the same pipeline:
//!
//! ```text
//! execute ──┐
//!           ├─► validate ─► resolve ─► pre-check ─► handle ─► post-check ─► commit
//! dequeue ──┘
//!
//! enqueue ──► validate ─► CommandQueue::publish ─► Accepted
//! ```
//!
//! # Concurrency
//!
//! The engine never serializes executions itself. Two executions against
//! the same entity race to `save`; the loser gets a version conflict and
//! the whole pipeline (minus validation) is re-run against fresh state, up
//! to `max_conflict_retries` times.
//!
//! # Cancellation
//!
//! Dropping an `execute` future before the commit starts persists nothing.
//! The commit itself runs on its own task and always completes.
//!
//! # Example
//!
//! ```rust
//! use cim_command_engine::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(InMemoryRepository::new());
//! let publisher = Arc::new(InMemoryEventPublisher::new());
//! let ports = EnginePorts::new(repository.clone(), repository.clone(), publisher.clone());
//!
//! let engine = Engine::builder(ports)
//!     .entity(EntityDefinition::new(
//!         "counter",
//!         Schema::new("Counter").field(FieldSchema::integer("value").optional()),
//!     ))
//!     .command(
//!         CommandDefinition::new("Bump", Schema::new("Bump").field(FieldSchema::string("id")))
//!             .targeting(target_field("id")),
//!     )
//!     .event(EventDefinition::new("Bumped", Schema::new("Bumped")))
//!     .handler(HandlerRegistration::for_entity(
//!         "Bump",
//!         "counter",
//!         CreationPolicy::IfMissing,
//!         fn_handler(|_ctx, _cmd, scope| {
//!             if let Some(counter) = scope.entity() {
//!                 let value = counter["value"].as_i64().unwrap_or(0);
//!                 counter["value"] = json!(value + 1);
//!             }
//!             scope.raise("Bumped", json!({}))?;
//!             Ok(())
//!         }),
//!     ))
//!     .build()?;
//!
//! let outcome = engine.execute("Bump", json!({"id": "c-1"})).await?;
//! assert_eq!(outcome.entity.unwrap().state["value"], 1);
//! assert_eq!(publisher.published().len(), 1);
//! # Ok(())
//! # }
//! ```

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, debug_span, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ContextSeed, ExecutionContext};
use crate::entity::{EntityDefinition, EntityKey, Target};
use crate::envelope::{CommandEnvelope, EventEnvelope};
use crate::errors::{ConfigurationError, EngineError, RepositoryError, SubmissionError};
use crate::handler::{EventBuffer, HandlerError, HandlerScope};
use crate::ports::{CommandQueue, EntityRepository, EventPublisher, OutboxStore};
use crate::registry::{
    Binding, CommandDefinition, EventDefinition, HandlerRegistration, Registry, RegistryBuilder,
};
use crate::resolver::{self, ResolutionError, ResolvedEntity};
use crate::schema::ValidatedPayload;
use crate::state_machine::TransactionPhase;
use crate::transaction::{
    CommitReceipt, PendingWrite, Publication, Transaction, TransactionCoordinator, UnitOfWork,
};

/// Adapters the engine talks to, supplied once at construction
#[derive(Clone)]
pub struct EnginePorts {
    pub repository: Arc<dyn EntityRepository>,
    pub outbox: Arc<dyn OutboxStore>,
    pub publisher: Arc<dyn EventPublisher>,

    /// Required only for `enqueue`
    pub queue: Option<Arc<dyn CommandQueue>>,
}

impl EnginePorts {
    pub fn new(
        repository: Arc<dyn EntityRepository>,
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            outbox,
            publisher,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn CommandQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// Collects wiring and configuration for an [`Engine`]
pub struct EngineBuilder {
    ports: EnginePorts,
    config: EngineConfig,
    registry: RegistryBuilder,
}

impl EngineBuilder {
    pub fn new(ports: EnginePorts) -> Self {
        Self {
            ports,
            config: EngineConfig::default(),
            registry: RegistryBuilder::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn command(mut self, definition: CommandDefinition) -> Self {
        self.registry.command(definition);
        self
    }

    pub fn entity(mut self, definition: EntityDefinition) -> Self {
        self.registry.entity(definition);
        self
    }

    pub fn event(mut self, definition: EventDefinition) -> Self {
        self.registry.event(definition);
        self
    }

    pub fn handler(mut self, registration: HandlerRegistration) -> Self {
        self.registry.handler(registration);
        self
    }

    /// Validate configuration and wiring
    pub fn build(self) -> Result<Engine, ConfigurationError> {
        self.config.validate()?;
        let registry = self.registry.build()?;
        let coordinator = TransactionCoordinator::new(
            self.ports.repository.clone(),
            self.ports.outbox.clone(),
            self.ports.publisher.clone(),
        );

        info!(?registry, "Command engine ready");
        Ok(Engine {
            inner: Arc::new(EngineInner {
                registry,
                ports: self.ports,
                coordinator,
                config: self.config,
            }),
        })
    }
}

struct EngineInner {
    registry: Registry,
    ports: EnginePorts,
    coordinator: TransactionCoordinator,
    config: EngineConfig,
}

/// Command execution engine; cheap to clone and share across tasks
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Receipt for an enqueued command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub message_id: Uuid,
    pub trace_id: String,
    pub command_type: String,
}

/// State of the one entity a committed execution wrote
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedEntity {
    pub key: EntityKey,

    /// Stored version of the root record
    pub version: u64,

    /// State of the bound entity (the child, for child entities)
    pub state: Value,

    pub created: bool,
}

/// Result of a committed execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub context: ExecutionContext,
    pub entity: Option<CommittedEntity>,

    /// Events in raise order
    pub events: Vec<EventEnvelope>,
    pub publication: Publication,

    /// Phases of the committing attempt
    pub phases: Vec<TransactionPhase>,
}

/// Why one attempt did not commit
enum AttemptFailure {
    Conflict { entity_type: String, id: String },
    Engine(EngineError),
}

impl From<EngineError> for AttemptFailure {
    fn from(err: EngineError) -> Self {
        AttemptFailure::Engine(err)
    }
}

impl Engine {
    pub fn builder(ports: EnginePorts) -> EngineBuilder {
        EngineBuilder::new(ports)
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn ports(&self) -> &EnginePorts {
        &self.inner.ports
    }

    /// Run a command now with a fresh trace
    pub async fn execute(&self, command_type: &str, payload: Value) -> Result<ExecutionOutcome, EngineError> {
        self.execute_with(command_type, payload, ContextSeed::new()).await
    }

    /// Run a command now, continuing the caller's trace and metadata
    pub async fn execute_with(
        &self,
        command_type: &str,
        payload: Value,
        seed: ContextSeed,
    ) -> Result<ExecutionOutcome, EngineError> {
        self.execute_envelope(seed.into_envelope(command_type, payload))
            .await
    }

    /// Run a follow-up command caused by a published event
    ///
    /// The new command keeps the event's trace id and names the event as
    /// its cause.
    pub async fn execute_caused_by(
        &self,
        event: &EventEnvelope,
        command_type: &str,
        payload: Value,
    ) -> Result<ExecutionOutcome, EngineError> {
        self.execute_with(command_type, payload, ContextSeed::caused_by(event))
            .await
    }

    /// Run a fully formed envelope (also the dequeue path)
    pub async fn execute_envelope(&self, envelope: CommandEnvelope) -> Result<ExecutionOutcome, EngineError> {
        let span = info_span!(
            "command.execute",
            command = %envelope.command_type,
            trace_id = %envelope.trace_id,
            message_id = %envelope.message_id,
        );
        self.run(envelope).instrument(span).await
    }

    /// Hand a command to the queue and return without running it
    ///
    /// The command must be registered and its payload valid; the pipeline
    /// runs when a worker dequeues it.
    pub async fn enqueue(
        &self,
        command_type: &str,
        payload: Value,
        seed: ContextSeed,
    ) -> Result<Accepted, SubmissionError> {
        let command = self
            .inner
            .registry
            .command(command_type)
            .ok_or_else(|| SubmissionError::UnknownCommand(command_type.to_string()))?;
        command.schema().validate(&payload)?;

        let queue = self
            .inner
            .ports
            .queue
            .as_ref()
            .ok_or_else(|| SubmissionError::QueueUnavailable("no command queue configured".to_string()))?;

        let target = command.target(&payload);
        let mut envelope = seed.into_envelope(command_type, payload);
        envelope.target_id = target.map(|t| t.parent_id.unwrap_or(t.id));

        let accepted = Accepted {
            message_id: envelope.message_id,
            trace_id: envelope.trace_id.clone(),
            command_type: envelope.command_type.clone(),
        };
        queue.publish(envelope).await?;

        info!(
            command = %accepted.command_type,
            trace_id = %accepted.trace_id,
            message_id = %accepted.message_id,
            "Command enqueued"
        );
        Ok(accepted)
    }

    async fn run(&self, envelope: CommandEnvelope) -> Result<ExecutionOutcome, EngineError> {
        let binding = self
            .inner
            .registry
            .binding(&envelope.command_type)
            .ok_or_else(|| EngineError::UnknownCommand(envelope.command_type.clone()))?;

        let command = debug_span!("command.validate").in_scope(|| {
            binding
                .command
                .schema()
                .validate(&envelope.payload)
                .inspect_err(|err| debug!(violations = err.violations.len(), "Command rejected by schema"))
        })?;

        let target = match &binding.entity {
            Some(_) => Some(binding.command.target(command.value()).ok_or_else(|| {
                ResolutionError::MissingTarget {
                    command: envelope.command_type.clone(),
                }
            })?),
            None => None,
        };

        let max_attempts = self.inner.config.max_conflict_retries + 1;
        let mut attempt = 1;
        loop {
            match self
                .attempt(binding, &envelope, &command, target.as_ref(), attempt)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptFailure::Engine(err)) => {
                    debug!(error = %err, attempt, "Command failed");
                    return Err(err);
                }
                Err(AttemptFailure::Conflict { entity_type, id }) if attempt >= max_attempts => {
                    warn!(entity = %entity_type, %id, attempt, "Concurrency conflict, retries exhausted");
                    return Err(EngineError::ConcurrencyConflict {
                        entity_type,
                        id,
                        attempts: attempt,
                    });
                }
                Err(AttemptFailure::Conflict { entity_type, id }) => {
                    warn!(entity = %entity_type, %id, attempt, "Concurrency conflict, retrying");
                    let backoff = self.inner.config.backoff_for(attempt);
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One pass through the pipeline with a fresh context and transaction
    async fn attempt(
        &self,
        binding: &Binding,
        envelope: &CommandEnvelope,
        command: &ValidatedPayload,
        target: Option<&Target>,
        attempt: u32,
    ) -> Result<ExecutionOutcome, AttemptFailure> {
        let context = ExecutionContext::for_envelope(envelope, attempt);
        let mut transaction = Transaction::begin(&context);

        let result = self
            .drive(&mut transaction, binding, &context, command, target)
            .await;
        if result.is_err() {
            transaction.rollback();
        }
        result
    }

    async fn drive(
        &self,
        tx: &mut Transaction,
        binding: &Binding,
        context: &ExecutionContext,
        command: &ValidatedPayload,
        target: Option<&Target>,
    ) -> Result<ExecutionOutcome, AttemptFailure> {
        tx.accept_validated(command)?;

        let mut resolved = match (&binding.entity, target) {
            (Some(definition), Some(target)) => Some(
                resolver::resolve(
                    self.inner.ports.repository.as_ref(),
                    definition,
                    target,
                    binding.creation_policy,
                )
                .instrument(debug_span!("command.resolve", entity = definition.name()))
                .await?,
            ),
            _ => None,
        };

        tx.advance()?;
        binding
            .plan
            .check_before(context, command.value(), resolved.as_ref().map(|r| &r.state))
            .instrument(debug_span!("command.pre_check"))
            .await?;

        tx.advance()?;
        let key = resolved.as_ref().map(|r| r.key.clone());
        let mut buffer = EventBuffer::new(self.inner.registry.events(), context, key.as_ref());
        {
            let (entity, is_new) = match resolved.as_mut() {
                Some(r) => (Some(&mut r.state), r.is_new),
                None => (None, false),
            };
            binding
                .handler
                .handle(context, command, HandlerScope::new(entity, is_new, &mut buffer))
                .instrument(debug_span!("command.handle"))
                .await
                .map_err(handler_failure)?;
        }
        if let (Some(definition), Some(resolved)) = (&binding.entity, &resolved) {
            check_entity_state(definition, resolved)?;
        }
        debug!(events = buffer.len(), "Handler completed");

        tx.advance()?;
        binding
            .plan
            .check_after(
                context,
                command.value(),
                resolved.as_ref().map(|r| &r.state),
                buffer.events(),
            )
            .instrument(debug_span!("command.post_check"))
            .await?;

        tx.advance()?;
        let committed_state = resolved.as_ref().map(|r| (r.state.clone(), r.is_new));
        let work = UnitOfWork {
            write: resolved.map(|r| {
                let (key, record, expected) = r.into_record();
                PendingWrite {
                    key,
                    record,
                    expected,
                }
            }),
            events: buffer.into_events(),
        };

        let receipt = self
            .commit(work)
            .instrument(debug_span!("command.commit"))
            .await?;
        tx.advance()?;

        let entity = match (key, receipt.version, committed_state) {
            (Some(key), Some(version), Some((state, created))) => Some(CommittedEntity {
                key,
                version,
                state,
                created,
            }),
            _ => None,
        };

        info!(
            command = %context.command_type,
            trace_id = %context.trace_id,
            attempt = context.attempt,
            entity = ?entity.as_ref().map(|e| e.key.to_string()),
            events = receipt.events.len(),
            "Command committed"
        );

        Ok(ExecutionOutcome {
            context: context.clone(),
            entity,
            events: receipt.events,
            publication: receipt.publication,
            phases: tx.path(),
        })
    }

    /// Commit on a detached task so a dropped caller cannot interrupt it
    async fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, AttemptFailure> {
        let coordinator = self.inner.coordinator.clone();
        let task = tokio::spawn(async move { coordinator.commit(work).await }.instrument(Span::current()));

        match task.await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(RepositoryError::Conflict { entity_type, id, .. })) => {
                Err(AttemptFailure::Conflict { entity_type, id })
            }
            Ok(Err(err)) => Err(AttemptFailure::Engine(EngineError::Fatal(
                anyhow::Error::new(err).context("entity save failed"),
            ))),
            Err(join) => Err(AttemptFailure::Engine(EngineError::Fatal(
                anyhow::Error::new(join).context("commit task failed"),
            ))),
        }
    }
}

fn handler_failure(err: HandlerError) -> EngineError {
    match err {
        HandlerError::Rejected { code, message } => EngineError::Rejected { code, message },
        HandlerError::Failed(source) => EngineError::Fatal(source.context("handler failed")),
    }
}

/// The handler must keep the identity and leave schema-valid state
fn check_entity_state(definition: &EntityDefinition, resolved: &ResolvedEntity) -> Result<(), EngineError> {
    if definition.identity(&resolved.state).as_deref() != Some(resolved.key.id.as_str()) {
        return Err(EngineError::fatal(format!(
            "handler changed the identity of {}",
            resolved.key
        )));
    }
    definition
        .schema()
        .validate(&resolved.state)
        .map(|_| ())
        .map_err(EngineError::InvalidEntityState)
}
