// Copyright (c) 2025 - Cowboy AI, Inc.
//! Invariants
//!
//! An invariant is a named predicate over a command payload and entity
//! state. It is tagged with a [`Timing`] (before or after the handler) and a
//! [`InvariantScope`] that decides where in the ordering it runs:
//!
//! ```text
//! before:  Entity ──► Command(name)
//!          ── handler runs ──
//! after:   Command(name) ──► Event(name) ──► Entity
//! ```
//!
//! Checks are fail-fast within a phase: later rules may assume earlier
//! ones held.
//!
//! # Example
//!
//! ```rust
//! use cim_command_engine::invariant::Invariant;
//!
//! let non_negative = Invariant::after(
//!     "non_negative_balance",
//!     "Balance must not go negative",
//!     |input| input.state_i64("balance").map_or(true, |b| b >= 0),
//! );
//! assert_eq!(non_negative.code(), "non_negative_balance");
//! ```

mod evaluator;

pub use evaluator::InvariantPlan;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;

/// When an invariant runs relative to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    Before,
    After,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Before => write!(f, "before"),
            Timing::After => write!(f, "after"),
        }
    }
}

/// What an invariant applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvariantScope {
    /// Every command against the entity
    Entity,

    /// Only the named command
    Command(String),

    /// Each buffered event of the named type (after phase only)
    Event(String),
}

/// Everything a check may look at
#[derive(Debug, Clone, Copy)]
pub struct InvariantInput<'a> {
    pub context: &'a ExecutionContext,

    /// Command payload, or the event payload for event-scoped rules
    pub payload: &'a Value,

    /// Current entity state; `None` for stateless executions
    pub state: Option<&'a Value>,
}

impl<'a> InvariantInput<'a> {
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn state_i64(&self, key: &str) -> Option<i64> {
        self.state.and_then(|s| s.get(key)).and_then(Value::as_i64)
    }

    pub fn state_field(&self, key: &str) -> Option<&'a Value> {
        self.state.and_then(|s| s.get(key))
    }
}

/// Asynchronous invariant predicate
///
/// Implement this for checks that consult a read model or another port.
/// An `Err` is not a rule violation: it aborts the execution as fatal.
#[async_trait]
pub trait InvariantCheck: Send + Sync {
    async fn check(&self, input: InvariantInput<'_>) -> anyhow::Result<bool>;
}

/// Synchronous closure check
struct FnCheck<F>(F);

#[async_trait]
impl<F> InvariantCheck for FnCheck<F>
where
    F: Fn(&InvariantInput<'_>) -> bool + Send + Sync,
{
    async fn check(&self, input: InvariantInput<'_>) -> anyhow::Result<bool> {
        Ok((self.0)(&input))
    }
}

/// Named, scoped, timed rule
#[derive(Clone)]
pub struct Invariant {
    code: String,
    message: String,
    timing: Timing,
    scope: InvariantScope,
    check: Arc<dyn InvariantCheck>,
}

impl Invariant {
    /// Entity-scoped rule checked before the handler
    pub fn before<F>(code: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&InvariantInput<'_>) -> bool + Send + Sync + 'static,
    {
        Self::with_check(code, message, Timing::Before, FnCheck(check))
    }

    /// Entity-scoped rule checked after the handler
    pub fn after<F>(code: impl Into<String>, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&InvariantInput<'_>) -> bool + Send + Sync + 'static,
    {
        Self::with_check(code, message, Timing::After, FnCheck(check))
    }

    /// Rule backed by an asynchronous check
    pub fn with_check(
        code: impl Into<String>,
        message: impl Into<String>,
        timing: Timing,
        check: impl InvariantCheck + 'static,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timing,
            scope: InvariantScope::Entity,
            check: Arc::new(check),
        }
    }

    /// Narrow the rule to one command type
    pub fn for_command(mut self, command_type: impl Into<String>) -> Self {
        self.scope = InvariantScope::Command(command_type.into());
        self
    }

    /// Narrow the rule to one event type; event rules always run after
    pub fn for_event(mut self, event_type: impl Into<String>) -> Self {
        self.scope = InvariantScope::Event(event_type.into());
        self.timing = Timing::After;
        self
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn scope(&self) -> &InvariantScope {
        &self.scope
    }

    /// Run the predicate, converting `false` into a violation
    pub(crate) async fn evaluate(
        &self,
        input: InvariantInput<'_>,
    ) -> Result<Result<(), InvariantViolation>, anyhow::Error> {
        if self.check.check(input).await? {
            Ok(Ok(()))
        } else {
            Ok(Err(InvariantViolation {
                code: self.code.clone(),
                message: self.message.clone(),
                timing: self.timing,
            }))
        }
    }
}

impl fmt::Debug for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invariant")
            .field("code", &self.code)
            .field("timing", &self.timing)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A rule that returned false
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message} ({timing} handler)")]
pub struct InvariantViolation {
    pub code: String,
    pub message: String,
    pub timing: Timing,
}
