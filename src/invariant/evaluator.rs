// Copyright (c) 2025 - Cowboy AI, Inc.
//! Invariant ordering and fail-fast evaluation

use serde_json::Value;
use tracing::debug;

use super::{Invariant, InvariantInput, InvariantScope, Timing};
use crate::context::ExecutionContext;
use crate::envelope::EventEnvelope;
use crate::errors::EngineError;

/// Ordered invariant checks for one (command, entity) binding
///
/// Built once at registration so dispatch does no sorting.
#[derive(Debug, Clone, Default)]
pub struct InvariantPlan {
    before: Vec<Invariant>,
    after_command: Vec<Invariant>,
    after_event: Vec<Invariant>,
    after_entity: Vec<Invariant>,
}

impl InvariantPlan {
    /// Order entity rules and handler rules for `command_type`
    ///
    /// Handler rules are command-scoped unless they name an event.
    pub fn build(command_type: &str, entity_rules: &[Invariant], handler_rules: &[Invariant]) -> Self {
        let mut before_entity = Vec::new();
        let mut before_command = Vec::new();
        let mut plan = Self::default();

        for rule in entity_rules {
            match (rule.scope(), rule.timing()) {
                (InvariantScope::Entity, Timing::Before) => before_entity.push(rule.clone()),
                (InvariantScope::Entity, Timing::After) => plan.after_entity.push(rule.clone()),
                (InvariantScope::Command(name), Timing::Before) if name == command_type => {
                    before_command.push(rule.clone())
                }
                (InvariantScope::Command(name), Timing::After) if name == command_type => {
                    plan.after_command.push(rule.clone())
                }
                (InvariantScope::Event(_), _) => plan.after_event.push(rule.clone()),
                _ => {}
            }
        }

        for rule in handler_rules {
            match (rule.scope(), rule.timing()) {
                (InvariantScope::Event(_), _) => plan.after_event.push(rule.clone()),
                (_, Timing::Before) => before_command.push(rule.clone()),
                (_, Timing::After) => plan.after_command.push(rule.clone()),
            }
        }

        before_entity.extend(before_command);
        plan.before = before_entity;
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after_command.is_empty()
            && self.after_event.is_empty()
            && self.after_entity.is_empty()
    }

    /// Codes of the before phase, in evaluation order
    pub fn before_codes(&self) -> Vec<&str> {
        self.before.iter().map(Invariant::code).collect()
    }

    /// Codes of the after phase, in evaluation order
    pub fn after_codes(&self) -> Vec<&str> {
        self.after_command
            .iter()
            .chain(&self.after_event)
            .chain(&self.after_entity)
            .map(Invariant::code)
            .collect()
    }

    /// Entity rules, then command rules; stops at the first failure
    pub async fn check_before(
        &self,
        context: &ExecutionContext,
        payload: &Value,
        state: Option<&Value>,
    ) -> Result<(), EngineError> {
        let input = InvariantInput {
            context,
            payload,
            state,
        };
        for rule in &self.before {
            check(rule, input).await?;
        }
        Ok(())
    }

    /// Command rules, then event rules per raised event, then entity rules
    pub async fn check_after(
        &self,
        context: &ExecutionContext,
        payload: &Value,
        state: Option<&Value>,
        events: &[EventEnvelope],
    ) -> Result<(), EngineError> {
        let input = InvariantInput {
            context,
            payload,
            state,
        };
        for rule in &self.after_command {
            check(rule, input).await?;
        }

        for event in events {
            for rule in &self.after_event {
                if matches!(rule.scope(), InvariantScope::Event(name) if *name == event.event_type) {
                    let event_input = InvariantInput {
                        payload: &event.payload,
                        ..input
                    };
                    check(rule, event_input).await?;
                }
            }
        }

        for rule in &self.after_entity {
            check(rule, input).await?;
        }
        Ok(())
    }
}

async fn check(rule: &Invariant, input: InvariantInput<'_>) -> Result<(), EngineError> {
    let outcome = rule.evaluate(input).await.map_err(|err| {
        EngineError::Fatal(err.context(format!("invariant {} could not be evaluated", rule.code())))
    })?;

    match outcome {
        Ok(()) => {
            debug!(invariant = rule.code(), timing = %rule.timing(), "Invariant held");
            Ok(())
        }
        Err(violation) => {
            debug!(invariant = rule.code(), timing = %rule.timing(), "Invariant violated");
            Err(violation.into())
        }
    }
}
