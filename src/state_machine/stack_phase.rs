// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stack operation phases
//!
//! This is a **Mealy Machine**: the output is the reporting class of the
//! observed status, which depends on both the phase and the input.
//!
//! - `Submit(op)`: None → Creating | Updating | Deleting
//! - `Observe(status)` of the stack itself:
//!   - warning → RollingBack
//!   - success → Succeeded
//!   - failure → Failed
//!   - informational → unchanged

use std::fmt;

use super::{StateMachine, TransitionError, TransitionResult};
use crate::stack::{StackOperation, StackStatus, StatusClass};

/// Phase of one stack operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackPhase {
    None,
    Creating,
    Updating,
    Deleting,
    RollingBack,
    Succeeded(StackStatus),
    Failed(StackStatus),
}

/// Inputs of [`StackPhase`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackInput {
    Submit(StackOperation),
    Observe(StackStatus),
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackPhase::None => write!(f, "NONE"),
            StackPhase::Creating => write!(f, "CREATING"),
            StackPhase::Updating => write!(f, "UPDATING"),
            StackPhase::Deleting => write!(f, "DELETING"),
            StackPhase::RollingBack => write!(f, "ROLLING_BACK"),
            StackPhase::Succeeded(s) => write!(f, "SUCCEEDED({s})"),
            StackPhase::Failed(s) => write!(f, "FAILED({s})"),
        }
    }
}

impl StateMachine for StackPhase {
    type Input = StackInput;
    type Output = Option<StatusClass>;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.to_string()));
        }
        match (self, input) {
            (StackPhase::None, StackInput::Submit(op)) => {
                let next = match op {
                    StackOperation::Create => StackPhase::Creating,
                    StackOperation::Update => StackPhase::Updating,
                    StackOperation::Delete => StackPhase::Deleting,
                };
                Ok((next, None))
            }
            (StackPhase::None, StackInput::Observe(_)) | (_, StackInput::Submit(_)) => {
                Err(TransitionError::InvalidTransition {
                    from: self.to_string(),
                    input: format!("{input:?}"),
                })
            }
            (_, StackInput::Observe(status)) => {
                let class = status.classify();
                let next = match class {
                    StatusClass::Success => StackPhase::Succeeded(status.clone()),
                    StatusClass::Failure => StackPhase::Failed(status.clone()),
                    StatusClass::Warning => StackPhase::RollingBack,
                    StatusClass::Info => self.clone(),
                };
                Ok((next, Some(class)))
            }
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, StackPhase::Succeeded(_) | StackPhase::Failed(_))
    }
}

impl StackPhase {
    /// Exit code of a finished operation; non-zero until success is observed
    pub fn exit_code(&self) -> i32 {
        match self {
            StackPhase::Succeeded(_) => 0,
            _ => 1,
        }
    }
}
