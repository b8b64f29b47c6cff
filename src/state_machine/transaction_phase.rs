// Copyright (c) 2025 - Cowboy AI, Inc.
//! Transaction Phase State Machine
//!
//! The lifecycle of one command execution attempt.
//!
//! # States
//!
//! ```text
//! PENDING → VALIDATING → RESOLVING → PRE_CHECKING → EXECUTING
//!         → POST_CHECKING → COMMITTING → COMMITTED
//!                │
//!                └─ Abort (any non-terminal phase) → ROLLED_BACK
//! ```
//!
//! # Inputs
//!
//! - Advance: move to the next phase; phases are never skipped
//! - Abort: roll back; from COMMITTING only when the entity write failed
//!
//! COMMITTED and ROLLED_BACK are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

/// Phase of a command transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPhase {
    Pending,
    Validating,
    Resolving,
    PreChecking,
    Executing,
    PostChecking,
    Committing,
    Committed,
    RolledBack,
}

/// Phase machine input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseInput {
    Advance,
    Abort,
}

impl TransactionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionPhase::Committed | TransactionPhase::RolledBack)
    }

    /// Phase reached by a successful step
    fn next(&self) -> Option<Self> {
        use TransactionPhase::*;

        match self {
            Pending => Some(Validating),
            Validating => Some(Resolving),
            Resolving => Some(PreChecking),
            PreChecking => Some(Executing),
            Executing => Some(PostChecking),
            PostChecking => Some(Committing),
            Committing => Some(Committed),
            Committed | RolledBack => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use TransactionPhase::*;

        match self {
            Pending => "PENDING",
            Validating => "VALIDATING",
            Resolving => "RESOLVING",
            PreChecking => "PRE_CHECKING",
            Executing => "EXECUTING",
            PostChecking => "POST_CHECKING",
            Committing => "COMMITTING",
            Committed => "COMMITTED",
            RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for TransactionPhase {
    type Input = PhaseInput;

    fn step(&self, input: PhaseInput) -> TransitionResult<Self> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.to_string()));
        }

        match input {
            PhaseInput::Abort => Ok(TransactionPhase::RolledBack),
            PhaseInput::Advance => self.next().ok_or_else(|| TransitionError::InvalidTransition {
                from: self.to_string(),
                input: "Advance".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Recorded;
    use chrono::Utc;

    #[test]
    fn test_happy_path_visits_every_phase() {
        let mut fsm = Recorded::new(TransactionPhase::Pending);
        while !fsm.state().is_terminal() {
            fsm.apply(PhaseInput::Advance, Utc::now()).unwrap();
        }

        let path: Vec<_> = fsm.path().iter().map(|p| p.as_str()).collect();
        assert_eq!(
            path,
            vec![
                "PENDING",
                "VALIDATING",
                "RESOLVING",
                "PRE_CHECKING",
                "EXECUTING",
                "POST_CHECKING",
                "COMMITTING",
                "COMMITTED"
            ]
        );
    }

    #[test]
    fn test_abort_from_any_open_phase() {
        for phase in [
            TransactionPhase::Pending,
            TransactionPhase::Resolving,
            TransactionPhase::Executing,
            TransactionPhase::Committing,
        ] {
            assert_eq!(phase.step(PhaseInput::Abort), Ok(TransactionPhase::RolledBack));
        }
    }

    #[test]
    fn test_terminal_phases_accept_nothing() {
        for phase in [TransactionPhase::Committed, TransactionPhase::RolledBack] {
            assert!(!phase.accepts(PhaseInput::Advance));
            assert!(!phase.accepts(PhaseInput::Abort));
        }
    }

    #[test]
    fn test_phase_wire_name() {
        let json = serde_json::to_string(&TransactionPhase::PreChecking).unwrap();
        assert_eq!(json, "\"PRE_CHECKING\"");
    }
}
