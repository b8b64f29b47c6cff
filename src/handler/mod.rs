// Copyright (c) 2025 - Cowboy AI, Inc.
//! Handler Executor
//!
//! A command handler receives the execution context, the validated command
//! and a [`HandlerScope`]: the one entity state it may mutate (or none for a
//! stateless handler) plus the execution's [`EventBuffer`].
//!
//! Handlers never persist or publish. The engine does both after the
//! after-phase invariants pass.
//!
//! # Example
//!
//! ```rust
//! use cim_command_engine::handler::{fn_handler, HandlerError};
//! use serde_json::json;
//!
//! let issue = fn_handler(|_ctx, command, scope| {
//!     let amount = command.get("amount").cloned().unwrap_or(json!(0));
//!     if let Some(card) = scope.entity() {
//!         card["balance"] = amount.clone();
//!     }
//!     scope.raise("CardIssued", json!({ "amount": amount }))?;
//!     Ok::<(), HandlerError>(())
//! });
//! # let _ = issue;
//! ```

mod buffer;
mod typed;

pub use buffer::{EventBuffer, RaiseError};
pub use typed::typed_handler;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::envelope::EventEnvelope;
use crate::schema::ValidatedPayload;

/// Failure reported by a handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business refusal the caller can branch on
    #[error("Command rejected [{code}]: {message}")]
    Rejected { code: String, message: String },

    /// Anything else; surfaces as a fatal engine error
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<RaiseError> for HandlerError {
    fn from(err: RaiseError) -> Self {
        HandlerError::Failed(anyhow::Error::new(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Failed(anyhow::Error::new(err))
    }
}

/// What a handler may touch during one invocation
pub struct HandlerScope<'a> {
    entity: Option<&'a mut Value>,
    is_new: bool,
    events: &'a mut EventBuffer,
}

impl<'a> HandlerScope<'a> {
    pub(crate) fn new(entity: Option<&'a mut Value>, is_new: bool, events: &'a mut EventBuffer) -> Self {
        Self {
            entity,
            is_new,
            events,
        }
    }

    /// Mutable entity state; `None` for stateless handlers
    pub fn entity(&mut self) -> Option<&mut Value> {
        self.entity.as_deref_mut()
    }

    pub fn state(&self) -> Option<&Value> {
        self.entity.as_deref()
    }

    /// Whether the state was freshly constructed by the creation policy
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Stage an event in the buffer
    pub fn raise(&mut self, event_type: &str, payload: Value) -> Result<&EventEnvelope, RaiseError> {
        self.events.raise(event_type, payload)
    }

    /// Stage a serializable event
    pub fn raise_typed<E: Serialize>(&mut self, event_type: &str, event: &E) -> Result<(), HandlerError> {
        let payload = serde_json::to_value(event)?;
        self.events.raise(event_type, payload)?;
        Ok(())
    }

    /// Events raised so far, in raise order
    pub fn raised(&self) -> &[EventEnvelope] {
        self.events.events()
    }
}

/// Domain logic for one command type
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        context: &ExecutionContext,
        command: &ValidatedPayload,
        scope: HandlerScope<'_>,
    ) -> Result<(), HandlerError>;
}

/// Closure-backed handler over raw JSON
struct FnHandler<F>(F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&ExecutionContext, &ValidatedPayload, &mut HandlerScope<'_>) -> Result<(), HandlerError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        context: &ExecutionContext,
        command: &ValidatedPayload,
        mut scope: HandlerScope<'_>,
    ) -> Result<(), HandlerError> {
        (self.0)(context, command, &mut scope)
    }
}

/// Wrap a synchronous closure as a [`CommandHandler`]
pub fn fn_handler<F>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(&ExecutionContext, &ValidatedPayload, &mut HandlerScope<'_>) -> Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}
