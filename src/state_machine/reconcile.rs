// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reconciliation phases of one wire/unwire call

use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};

/// Where a wire/unwire call is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    NotStarted,
    FunctionResolved,
    /// An entry's adapter is being driven
    Dispatched,
    /// The last entry converged
    Converged,
    /// The last entry failed; later entries still run
    Failed,
    Done,
}

/// Inputs of [`ReconcilePhase`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileInput {
    Resolve,
    Dispatch,
    Settle { ok: bool },
    Finish,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReconcilePhase::NotStarted => "NOT_STARTED",
            ReconcilePhase::FunctionResolved => "FUNCTION_RESOLVED",
            ReconcilePhase::Dispatched => "DISPATCHED",
            ReconcilePhase::Converged => "CONVERGED",
            ReconcilePhase::Failed => "FAILED",
            ReconcilePhase::Done => "DONE",
        };
        write!(f, "{name}")
    }
}

impl StateMachine for ReconcilePhase {
    type Input = ReconcileInput;
    type Output = ();

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        use ReconcileInput::*;
        use ReconcilePhase::*;

        let next = match (self, input) {
            (Done, _) => return Err(TransitionError::Terminal(self.to_string())),
            (NotStarted, Resolve) => FunctionResolved,
            (FunctionResolved | Converged | Failed, Dispatch) => Dispatched,
            (Dispatched, Settle { ok: true }) => Converged,
            (Dispatched, Settle { ok: false }) => Failed,
            (FunctionResolved | Converged | Failed, Finish) => Done,
            _ => {
                return Err(TransitionError::InvalidTransition {
                    from: self.to_string(),
                    input: format!("{input:?}"),
                })
            }
        };
        Ok((next, ()))
    }

    fn is_terminal(&self) -> bool {
        *self == ReconcilePhase::Done
    }
}
