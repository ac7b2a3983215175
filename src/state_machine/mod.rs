// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machines
//!
//! The stack lifecycle and the reconciler both follow small, closed state
//! machines. Transitions are pure functions; the operations that drive them
//! keep a [`StateMachineWithHistory`] so the path taken can be reported and
//! asserted on.
//!
//! ```text
//! (State, Input) → (State, Output)
//! ```
//!
//! - [`StackPhase`]: NONE → CREATING | UPDATING | DELETING → ROLLING BACK →
//!   SUCCEEDED | FAILED
//! - [`ReconcilePhase`]: NOT_STARTED → FUNCTION_RESOLVED → (DISPATCHED →
//!   CONVERGED | FAILED)* → DONE

pub mod reconcile;
pub mod stack_phase;

pub use reconcile::{ReconcileInput, ReconcilePhase};
pub use stack_phase::{StackInput, StackPhase};

use chrono::{DateTime, Utc};

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Transition from current state with this input is not allowed
    #[error("Invalid transition from {from} on {input}")]
    InvalidTransition { from: String, input: String },

    /// The machine already reached a terminal state
    #[error("State {0} is terminal")]
    Terminal(String),
}

/// A finite state machine with typed states, inputs and outputs
pub trait StateMachine: Sized + Clone {
    /// Input type that triggers transitions
    type Input;

    /// Output type produced by transitions (use () if none)
    type Output;

    /// Attempt to transition to a new state given an input
    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    /// Check if a transition is valid without performing it
    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }

    /// Whether no input leads out of this state
    fn is_terminal(&self) -> bool;
}

/// Transition metadata
#[derive(Debug, Clone)]
pub struct Transition<S, I> {
    pub from: S,
    pub to: S,
    pub input: I,
    pub timestamp: DateTime<Utc>,
}

/// State machine with transition history
#[derive(Debug, Clone)]
pub struct StateMachineWithHistory<FSM: StateMachine> {
    current: FSM,
    history: Vec<Transition<FSM, FSM::Input>>,
}

impl<FSM: StateMachine> StateMachineWithHistory<FSM> {
    pub fn new(initial: FSM) -> Self {
        Self {
            current: initial,
            history: Vec::new(),
        }
    }

    /// Transition now, recording the step
    pub fn apply(&mut self, input: FSM::Input) -> TransitionResult<FSM::Output>
    where
        FSM::Input: Clone,
    {
        self.apply_at(input, Utc::now())
    }

    /// Transition with an explicit timestamp
    pub fn apply_at(
        &mut self,
        input: FSM::Input,
        timestamp: DateTime<Utc>,
    ) -> TransitionResult<FSM::Output>
    where
        FSM::Input: Clone,
    {
        let (to, output) = self.current.transition(&input)?;
        self.history.push(Transition {
            from: self.current.clone(),
            to: to.clone(),
            input,
            timestamp,
        });
        self.current = to;
        Ok(output)
    }

    pub fn history(&self) -> &[Transition<FSM, FSM::Input>] {
        &self.history
    }

    pub fn current(&self) -> &FSM {
        &self.current
    }

    /// States visited so far, starting with the initial one
    pub fn path(&self) -> Vec<FSM> {
        let mut path = Vec::with_capacity(self.history.len() + 1);
        match self.history.first() {
            Some(first) => path.push(first.from.clone()),
            None => path.push(self.current.clone()),
        }
        path.extend(self.history.iter().map(|t| t.to.clone()));
        path
    }
}
