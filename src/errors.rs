//! Error types for command engine operations

use thiserror::Error;

use crate::invariant::InvariantViolation;
use crate::resolver::ResolutionError;
use crate::schema::ValidationError;

/// Terminal outcome of a failed command execution
///
/// Business failures (`Validation`, `EntityResolution`, `InvariantViolation`,
/// `Rejected`) are expected outcomes the application layer translates for
/// users. Everything else is infrastructure or programmer failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload failed its command schema; no transaction was opened
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No command definition registered under this name
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// Creation policy could not be satisfied
    #[error("Entity resolution error: {0}")]
    EntityResolution(#[from] ResolutionError),

    /// A before/after invariant returned false
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    /// The handler refused the command with a business code
    #[error("Command rejected [{code}]: {message}")]
    Rejected { code: String, message: String },

    /// Entity state no longer matches its schema after the handler ran
    #[error("Entity state invalid after handler: {0}")]
    InvalidEntityState(ValidationError),

    /// Save-time version conflict that survived every automatic retry
    #[error("Concurrency conflict on {entity_type}/{id} after {attempts} attempt(s)")]
    ConcurrencyConflict {
        entity_type: String,
        id: String,
        attempts: u32,
    },

    /// Port unavailable, programmer error, or opaque handler failure
    #[error("Fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl EngineError {
    /// Build a fatal error from a message
    pub fn fatal(message: impl Into<String>) -> Self {
        EngineError::Fatal(anyhow::anyhow!(message.into()))
    }

    /// Whether re-running the whole pipeline may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict { .. })
    }

    /// Whether this is an expected, typed business outcome
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::EntityResolution(_)
                | EngineError::InvariantViolation(_)
                | EngineError::Rejected { .. }
        )
    }

    /// Business code callers can branch on, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            EngineError::InvariantViolation(violation) => Some(violation.code.as_str()),
            EngineError::Rejected { code, .. } => Some(code.as_str()),
            EngineError::EntityResolution(err) => Some(err.code()),
            EngineError::Validation(_) => Some("validation_failed"),
            _ => None,
        }
    }
}

/// Failure to hand a command to the deferred queue
///
/// Distinct from [`EngineError`]: the command never entered the pipeline.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// No command definition registered under this name
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// Payload failed its command schema before submission
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Queue refused the message because it is at capacity
    #[error("Command queue is full")]
    QueueFull,

    /// Queue could not be reached or is closed
    #[error("Command queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl From<QueueError> for SubmissionError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => SubmissionError::QueueFull,
            other => SubmissionError::QueueUnavailable(other.to_string()),
        }
    }
}

/// Registration-time wiring errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Command {0} registered twice")]
    DuplicateCommand(String),

    #[error("Entity {0} registered twice")]
    DuplicateEntity(String),

    #[error("Event {0} registered twice")]
    DuplicateEvent(String),

    #[error("Command {0} already has a handler")]
    DuplicateHandler(String),

    #[error("Handler registered for unknown command {0}")]
    UnknownCommand(String),

    #[error("{referenced_by} references unknown entity {entity}")]
    UnknownEntity {
        referenced_by: String,
        entity: String,
    },

    #[error("Entity {entity} declares parent {parent}, which is itself a child entity")]
    NestedChild { entity: String, parent: String },

    #[error("Handler for {command} binds entity {entity} but the command declares no target")]
    MissingTarget { command: String, entity: String },

    #[error("Command {command} declares a target but its handler binds no entity")]
    UnboundTarget { command: String },

    #[error("Invalid setting {key}={value}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },
}

/// Entity repository port errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Optimistic concurrency check failed on save
    #[error("Version conflict on {entity_type}/{id}: expected {expected:?}, found {actual:?}")]
    Conflict {
        entity_type: String,
        id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Backing store unreachable
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// Stored state could not be encoded or decoded
    #[error("Repository serialization error: {0}")]
    Serialization(String),
}

/// Event publisher port errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err.to_string())
    }
}

/// Command queue port errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue is full")]
    Full,

    #[error("Queue is closed")]
    Closed,

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// NATS transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NatsError {
    #[error("NATS connection error: {0}")]
    Connection(String),

    #[error("NATS publish error: {0}")]
    Publish(String),

    #[error("NATS subscribe error: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for NatsError {
    fn from(err: serde_json::Error) -> Self {
        NatsError::Serialization(err.to_string())
    }
}

impl From<NatsError> for PublishError {
    fn from(err: NatsError) -> Self {
        match err {
            NatsError::Serialization(msg) => PublishError::Serialization(msg),
            other => PublishError::Unavailable(other.to_string()),
        }
    }
}

impl From<NatsError> for QueueError {
    fn from(err: NatsError) -> Self {
        match err {
            NatsError::Serialization(msg) => QueueError::Serialization(msg),
            other => QueueError::Unavailable(other.to_string()),
        }
    }
}
