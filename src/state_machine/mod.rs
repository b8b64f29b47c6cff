// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machines
//!
//! Pure state machines: a step maps `(state, input)` to the next state and
//! nothing else happens.
//!
//! ```text
//! (State, Input) → State
//! ```
//!
//! The transaction lifecycle ([`TransactionPhase`]) is the machine the
//! engine drives. [`Recorded`] wraps a machine and keeps every step, so a
//! finished transaction can report the path it took.

pub mod transaction_phase;

pub use transaction_phase::{PhaseInput, TransactionPhase};

use chrono::{DateTime, Utc};

/// Result of a single step
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Rejected step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Input not accepted in the current state
    #[error("Invalid transition from {from} on {input}")]
    InvalidTransition { from: String, input: String },

    /// The current state accepts no further input
    #[error("State {0} is terminal")]
    Terminal(String),
}

/// A deterministic state machine
pub trait StateMachine: Sized + Copy {
    type Input: Copy;

    /// Next state for `input`, or why the input is refused
    fn step(&self, input: Self::Input) -> TransitionResult<Self>;

    /// Whether `input` would be accepted
    fn accepts(&self, input: Self::Input) -> bool {
        self.step(input).is_ok()
    }
}

/// One applied step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step<S, I> {
    pub from: S,
    pub to: S,
    pub input: I,
    pub at: DateTime<Utc>,
}

/// A machine plus the steps it has taken
#[derive(Debug, Clone)]
pub struct Recorded<M: StateMachine> {
    initial: M,
    state: M,
    steps: Vec<Step<M, M::Input>>,
}

impl<M: StateMachine> Recorded<M> {
    pub fn new(initial: M) -> Self {
        Self {
            initial,
            state: initial,
            steps: Vec::new(),
        }
    }

    pub fn state(&self) -> M {
        self.state
    }

    /// Apply `input`; a refused input leaves state and log untouched
    pub fn apply(&mut self, input: M::Input, at: DateTime<Utc>) -> TransitionResult<M> {
        let to = self.state.step(input)?;
        self.steps.push(Step {
            from: self.state,
            to,
            input,
            at,
        });
        self.state = to;
        Ok(to)
    }

    pub fn steps(&self) -> &[Step<M, M::Input>] {
        &self.steps
    }

    /// Every state visited, starting with the initial one
    pub fn path(&self) -> Vec<M> {
        std::iter::once(self.initial)
            .chain(self.steps.iter().map(|s| s.to))
            .collect()
    }
}
